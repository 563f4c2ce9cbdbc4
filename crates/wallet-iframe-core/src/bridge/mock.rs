//! An in-memory [`PlatformBridge`] for host-target unit tests — lets the
//! transport's retry/backoff/timeout state machine be exercised without
//! a browser, by scripting how many `CONNECT` posts are dropped and when
//! (or whether) a `READY` arrives.

use super::{PlatformBridge, PortHandle, ResponseEnvelopeOrRequest};
use crate::error::{ErrorKind, WalletError, WalletResult};
use crate::overlay::OverlayState;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default, Debug)]
pub struct RecordedPort {
    pub sent: Mutex<Vec<ResponseEnvelopeOrRequest>>,
}

impl PortHandle for RecordedPort {
    fn post(&self, envelope: &ResponseEnvelopeOrRequest) -> WalletResult<()> {
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

/// A scriptable mock of the DOM/MessagePort surface.
pub struct MockBridge {
    pub loaded: AtomicBool,
    pub booted_hint: AtomicBool,
    pub connect_attempts_to_fail: AtomicU32,
    pub simulate_opaque_origin_throw_once: AtomicBool,
    pub overlay_log: Mutex<Vec<OverlayState>>,
    pub last_port: Mutex<Option<Arc<RecordedPort>>>,
    pub sleeps_recorded_ms: Mutex<Vec<u64>>,
}

impl Default for MockBridge {
    fn default() -> Self {
        Self {
            loaded: AtomicBool::new(true),
            booted_hint: AtomicBool::new(false),
            connect_attempts_to_fail: AtomicU32::new(0),
            simulate_opaque_origin_throw_once: AtomicBool::new(false),
            overlay_log: Mutex::new(Vec::new()),
            last_port: Mutex::new(None),
            sleeps_recorded_ms: Mutex::new(Vec::new()),
        }
    }
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_booted(&self, booted: bool) {
        self.booted_hint.store(booted, Ordering::SeqCst);
    }

    pub fn fail_next_n_connects(&self, n: u32) {
        self.connect_attempts_to_fail.store(n, Ordering::SeqCst);
    }
}

#[async_trait(?Send)]
impl PlatformBridge for MockBridge {
    async fn mount_iframe(&self, _wallet_service_url: &str) -> WalletResult<()> {
        Ok(())
    }

    async fn await_iframe_load(&self, _safety_timeout_ms: u64) -> WalletResult<()> {
        if self.loaded.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WalletError::new(ErrorKind::PortMissing, "iframe did not load"))
        }
    }

    fn has_booted_hint(&self) -> bool {
        self.booted_hint.load(Ordering::SeqCst)
    }

    async fn post_connect(
        &self,
        _wallet_origin: &str,
        allow_wildcard_fallback: bool,
    ) -> WalletResult<Box<dyn PortHandle>> {
        if self.simulate_opaque_origin_throw_once.swap(false, Ordering::SeqCst)
            && !allow_wildcard_fallback
        {
            return Err(WalletError::new(
                ErrorKind::PortMissing,
                "opaque origin post threw",
            ));
        }
        let remaining = self.connect_attempts_to_fail.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_attempts_to_fail.store(remaining - 1, Ordering::SeqCst);
            return Err(WalletError::new(
                ErrorKind::PortMissing,
                "simulated dropped CONNECT",
            ));
        }
        let port = Arc::new(RecordedPort::default());
        *self.last_port.lock().unwrap() = Some(port.clone());
        Ok(Box::new(SharedPort(port)))
    }

    fn apply_overlay(&self, state: &OverlayState) {
        self.overlay_log.lock().unwrap().push(state.clone());
    }

    async fn sleep(&self, millis: u64) {
        self.sleeps_recorded_ms.lock().unwrap().push(millis);
    }
}

#[derive(Debug)]
struct SharedPort(Arc<RecordedPort>);

impl PortHandle for SharedPort {
    fn post(&self, envelope: &ResponseEnvelopeOrRequest) -> WalletResult<()> {
        self.0.post(envelope)
    }
}
