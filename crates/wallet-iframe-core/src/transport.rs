//! `IframeTransport`: produces a ready `MessagePort` to a wallet-origin
//! document, handling the `CONNECT`/`READY` handshake, its retry/backoff
//! schedule, and concurrent-caller deduplication.

use crate::bridge::{PlatformBridge, PortHandle};
use crate::clock::Clock;
use crate::config::Defaults;
use crate::error::{ErrorKind, WalletError, WalletResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub wallet_origin: String,
    pub wallet_service_url: String,
    pub connect_timeout_ms: u64,
}

impl TransportConfig {
    /// Validates the pre-computed wallet service URL at construction
    /// time: invalid URLs fail here rather than at connect time.
    pub fn new(
        wallet_origin: impl Into<String>,
        wallet_service_url: impl Into<String>,
        connect_timeout_ms: u64,
    ) -> WalletResult<Self> {
        let wallet_origin = wallet_origin.into();
        let wallet_service_url = wallet_service_url.into();
        if !wallet_service_url.starts_with("https://") && !wallet_service_url.starts_with("http://localhost") {
            return Err(WalletError::new(
                ErrorKind::Unknown,
                format!("invalid wallet service URL: {wallet_service_url}"),
            ));
        }
        Ok(Self {
            wallet_origin,
            wallet_service_url,
            connect_timeout_ms,
        })
    }
}

/// Backoff schedule for retried `CONNECT` posts: 200ms for the first 10
/// attempts, 400ms for the next 10, then 800ms.
pub fn backoff_delay_ms(attempt: u32) -> u64 {
    match attempt {
        0..=9 => 200,
        10..=19 => 400,
        _ => 800,
    }
}

enum ConnectState {
    Idle,
    /// A handshake is in flight; concurrent callers await the same port.
    InFlight(Arc<tokio::sync::Notify>),
    Ready(Arc<dyn PortHandle>),
    Failed(String),
}

/// Mounts the hidden wallet-origin service document and performs the
/// deduplicated `connect()` handshake.
pub struct IframeTransport<B: PlatformBridge, C: Clock> {
    config: TransportConfig,
    bridge: Arc<B>,
    clock: Arc<C>,
    mounted: AtomicBool,
    state: Mutex<ConnectState>,
}

impl<B: PlatformBridge, C: Clock> IframeTransport<B, C> {
    pub fn new(config: TransportConfig, bridge: Arc<B>, clock: Arc<C>) -> Self {
        Self {
            config,
            bridge,
            clock,
            mounted: AtomicBool::new(false),
            state: Mutex::new(ConnectState::Idle),
        }
    }

    /// Idempotent mount of the hidden iframe.
    pub async fn mount(&self) -> WalletResult<()> {
        if self.mounted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bridge.mount_iframe(&self.config.wallet_service_url).await
    }

    /// Deduplicated connect: concurrent callers share one in-flight
    /// handshake and its resulting port.
    pub async fn connect(&self) -> WalletResult<Arc<dyn PortHandle>> {
        self.mount().await?;

        loop {
            let notify = {
                let mut state = self.state.lock().await;
                match &*state {
                    ConnectState::Ready(port) => return Ok(port.clone()),
                    ConnectState::InFlight(notify) => notify.clone(),
                    ConnectState::Failed(_) | ConnectState::Idle => {
                        let notify = Arc::new(tokio::sync::Notify::new());
                        *state = ConnectState::InFlight(notify.clone());
                        drop(state);
                        let result = self.run_handshake().await;
                        let mut state = self.state.lock().await;
                        *state = match &result {
                            Ok(port) => ConnectState::Ready(port.clone()),
                            Err(e) => ConnectState::Failed(e.message.clone()),
                        };
                        notify.notify_waiters();
                        return result;
                    }
                }
            };
            notify.notified().await;
        }
    }

    async fn run_handshake(&self) -> WalletResult<Arc<dyn PortHandle>> {
        let deadline = self.clock.now_millis() + self.config.connect_timeout_ms;

        self.bridge
            .await_iframe_load(Defaults::IFRAME_LOAD_SAFETY_TIMEOUT_MS)
            .await
            .ok();

        // Wait up to a quarter of the connect budget for the booted hint
        // before starting to post CONNECT.
        let boot_wait_budget = self.config.connect_timeout_ms / 4;
        let boot_deadline = self.clock.now_millis() + boot_wait_budget;
        while !self.bridge.has_booted_hint() && self.clock.now_millis() < boot_deadline {
            self.bridge.sleep(20).await;
        }

        let mut attempt: u32 = 0;
        loop {
            if self.clock.now_millis() >= deadline {
                return Err(WalletError::handshake_timeout(self.config.connect_timeout_ms));
            }

            match self
                .bridge
                .post_connect(&self.config.wallet_origin, true)
                .await
            {
                Ok(port) => return Ok(Arc::from(port)),
                Err(_) => {
                    let delay = backoff_delay_ms(attempt).min(deadline.saturating_sub(self.clock.now_millis()));
                    self.bridge.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBridge;
    use crate::clock::SystemClock;

    fn transport(bridge: Arc<MockBridge>) -> IframeTransport<MockBridge, SystemClock> {
        let config = TransportConfig::new("https://wallet.example.com", "https://wallet.example.com/sdk/service.html", 2_000).unwrap();
        IframeTransport::new(config, bridge, Arc::new(SystemClock))
    }

    #[test]
    fn backoff_schedule_matches_configured_tiers() {
        assert_eq!(backoff_delay_ms(0), 200);
        assert_eq!(backoff_delay_ms(9), 200);
        assert_eq!(backoff_delay_ms(10), 400);
        assert_eq!(backoff_delay_ms(19), 400);
        assert_eq!(backoff_delay_ms(20), 800);
        assert_eq!(backoff_delay_ms(100), 800);
    }

    #[test]
    fn invalid_wallet_service_url_fails_at_construction() {
        let err = TransportConfig::new("https://a.com", "not-a-url", 1_000).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn connect_succeeds_after_retries_and_dedupes_concurrent_callers() {
        let bridge = Arc::new(MockBridge::new());
        bridge.set_booted(true);
        bridge.fail_next_n_connects(2);
        let transport = Arc::new(transport(bridge.clone()));

        // `PlatformBridge` is `?Send` (its wasm32 impl holds non-Send
        // web-sys handles), so concurrent callers are local tasks under a
        // `LocalSet` rather than `tokio::spawn`, which requires `Send`.
        let local = tokio::task::LocalSet::new();
        let (port1, port2) = local
            .run_until(async move {
                let t1 = transport.clone();
                let t2 = transport.clone();
                let h1 = tokio::task::spawn_local(async move { t1.connect().await });
                let h2 = tokio::task::spawn_local(async move { t2.connect().await });
                (h1.await.unwrap().unwrap(), h2.await.unwrap().unwrap())
            })
            .await;
        assert!(Arc::ptr_eq(&port1, &port2));
    }

    #[tokio::test]
    async fn connect_fails_with_handshake_timeout_when_every_attempt_is_dropped() {
        let bridge = Arc::new(MockBridge::new());
        bridge.set_booted(true);
        bridge.fail_next_n_connects(u32::MAX);
        let config = TransportConfig::new("https://wallet.example.com", "https://wallet.example.com/sdk/service.html", 50).unwrap();
        let transport = IframeTransport::new(config, bridge, Arc::new(SystemClock));
        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::HandshakeTimeout);
    }
}
