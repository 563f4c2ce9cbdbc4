//! `WalletIframeRouter`: the parent application's single entry point.
//! Correlates requests by id, multiplexes progress through
//! [`crate::progress_bus::ProgressBus`], drives the overlay, enforces
//! timeouts, and strips non-cloneable options before posting.

use crate::bridge::{PlatformBridge, PortHandle, ResponseEnvelopeOrRequest};
use crate::clock::{Clock, MonotonicCounter};
use crate::config::{Defaults, WalletConfig};
use crate::envelope::{
    ErrorPayload, ProgressPayload, RequestEnvelope, RequestOptions, RequestPayload,
    ResponseEnvelope,
};
use crate::error::{ErrorKind, WalletError, WalletResult};
use crate::overlay::OverlayController;
use crate::pending::{PendingRequest, PendingRequestMap};
use crate::progress_bus::{PhaseIntent, ProgressBus};
use crate::transport::IframeTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared mutable router state: a single async mutex guarding
/// everything the parent's single JS thread would otherwise own
/// without contention.
struct RouterState {
    port: Option<Arc<dyn PortHandle>>,
    pending: PendingRequestMap,
    progress_bus: ProgressBus,
    overlay: OverlayController,
    config: WalletConfig,
    config_sent: bool,
}

pub struct WalletIframeRouter<B: PlatformBridge, C: Clock> {
    bridge: Arc<B>,
    clock: Arc<C>,
    transport: IframeTransport<B, C>,
    state: Mutex<RouterState>,
    init_lock: tokio::sync::Mutex<()>,
    ready: AtomicBool,
    counter: MonotonicCounter,
    default_request_timeout_ms: u64,
}

impl<B: PlatformBridge, C: Clock> WalletIframeRouter<B, C> {
    pub fn new(
        bridge: Arc<B>,
        clock: Arc<C>,
        transport: IframeTransport<B, C>,
        config: WalletConfig,
    ) -> Self {
        let default_request_timeout_ms = config
            .request_timeout_ms
            .unwrap_or(Defaults::DEFAULT_REQUEST_TIMEOUT_MS);
        Self {
            bridge,
            clock,
            transport,
            state: Mutex::new(RouterState {
                port: None,
                pending: PendingRequestMap::new(),
                progress_bus: ProgressBus::new(),
                overlay: OverlayController::new(),
                config,
                config_sent: false,
            }),
            init_lock: tokio::sync::Mutex::new(()),
            ready: AtomicBool::new(false),
            counter: MonotonicCounter::default(),
            default_request_timeout_ms,
        }
    }

    /// Deduplicates concurrent callers, obtains a port, and emits
    /// `PM_SET_CONFIG` exactly once.
    pub async fn init(&self) -> WalletResult<()> {
        let _guard = self.init_lock.lock().await;
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let port = self.transport.connect().await?;
        let mut state = self.state.lock().await;
        state.port = Some(port.clone());
        if !state.config_sent {
            let config_value = serde_json::to_value(&state.config)
                .map_err(|e| WalletError::new(ErrorKind::Unknown, e.to_string()))?;
            port.post(&ResponseEnvelopeOrRequest::Control(serde_json::json!({
                "type": "PM_SET_CONFIG",
                "payload": config_value,
            })))?;
            state.config_sent = true;
        }
        drop(state);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn next_request_id(&self) -> String {
        format!("{}-{}", self.clock.wall_millis(), self.counter.next())
    }

    /// The single code path for sending a request.
    pub async fn post(
        &self,
        payload: RequestPayload,
        options: RequestOptions,
        on_progress: Option<Box<dyn FnMut(&ProgressPayload) + Send>>,
    ) -> WalletResult<serde_json::Value> {
        self.init().await?;

        let requires_preflight = payload.requires_activation_preflight();
        if requires_preflight {
            self.show_frame_for_activation().await;
        }
        let result = self.post_inner(payload, options, on_progress).await;
        if requires_preflight {
            self.hide_frame_for_activation().await;
        }
        result
    }

    async fn post_inner(
        &self,
        payload: RequestPayload,
        options: RequestOptions,
        on_progress: Option<Box<dyn FnMut(&ProgressPayload) + Send>>,
    ) -> WalletResult<serde_json::Value> {
        let request_id = self.next_request_id();
        let (tx, rx) = tokio::sync::oneshot::channel::<Result<serde_json::Value, WalletError>>();

        let sticky = options.sticky;
        let deadline = self.clock.now_millis() + self.default_request_timeout_ms;

        let port = {
            let mut state = self.state.lock().await;
            state.progress_bus.register(
                request_id.clone(),
                sticky,
                on_progress.unwrap_or_else(|| Box::new(|_| {})),
            );
            state.pending.insert(
                request_id.clone(),
                PendingRequest {
                    resolve: Some(Box::new(move |res| {
                        let _ = tx.send(res);
                    })),
                    on_progress: None,
                    sticky,
                    deadline_millis: deadline,
                },
            );
            state
                .port
                .clone()
                .ok_or_else(|| WalletError::new(ErrorKind::PortMissing, "router not connected"))?
        };

        let envelope = RequestEnvelope {
            request_id: request_id.clone(),
            payload,
            options: RequestOptions { sticky },
        };

        if let Err(e) = port.post(&ResponseEnvelopeOrRequest::Request(envelope)) {
            self.cleanup_request(&request_id).await;
            return Err(e);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(WalletError::new(ErrorKind::Unknown, "response channel dropped")),
        }
    }

    async fn cleanup_request(&self, request_id: &str) {
        let mut state = self.state.lock().await;
        state.pending.take(request_id);
        let intent = state.progress_bus.unregister(request_id);
        self.apply_overlay_intent(&mut state, intent);
    }

    /// Routes one inbound envelope from the wallet host.
    pub async fn on_port_message(&self, envelope: ResponseEnvelope) {
        match envelope {
            ResponseEnvelope::Ready => {}
            ResponseEnvelope::Progress { request_id, payload } => {
                self.handle_progress(&request_id, payload).await;
            }
            ResponseEnvelope::Result { request_id, payload } => {
                self.handle_result(&request_id, payload.result).await;
            }
            ResponseEnvelope::Error { request_id, payload } => {
                self.handle_error(&request_id, payload).await;
            }
        }
    }

    async fn handle_progress(&self, request_id: &str, payload: ProgressPayload) {
        let mut state = self.state.lock().await;
        if !state.pending.contains(request_id) {
            // Drop any lingering subscriber for an id we no longer track.
            state.progress_bus.unregister(request_id);
            return;
        }
        state.pending.notify_progress(request_id, &payload);
        // Progress is liveness: refresh the deadline.
        let refreshed = self.clock.now_millis() + self.default_request_timeout_ms;
        state.pending.refresh_deadline(request_id, refreshed);
        let intent = state.progress_bus.dispatch(request_id, &payload);
        self.apply_overlay_intent(&mut state, intent);
    }

    async fn handle_result(&self, request_id: &str, result: serde_json::Value) {
        let mut state = self.state.lock().await;
        let sticky = state.progress_bus.is_sticky(request_id);
        if let Some(entry) = state.pending.take(request_id) {
            if let Some(resolve) = entry.resolve {
                resolve(Ok(result));
            }
        }
        if !sticky {
            let intent = state.progress_bus.unregister(request_id);
            self.apply_overlay_intent(&mut state, intent);
        }
    }

    async fn handle_error(&self, request_id: &str, payload: ErrorPayload) {
        let mut state = self.state.lock().await;
        let kind = ErrorKind::from_code(&payload.code);
        let error = WalletError {
            kind,
            message: payload.message.clone(),
            details: payload.details.clone(),
        };
        if let Some(entry) = state.pending.take(request_id) {
            if let Some(resolve) = entry.resolve {
                resolve(Err(error));
            }
        }
        let intent = state.progress_bus.dispatch_error(request_id, &payload);
        self.apply_overlay_intent(&mut state, intent);
    }

    /// Checks every pending request's deadline and times out any that
    /// have expired. Callers are expected to invoke this on a periodic
    /// tick (e.g. driven by a `setInterval` on wasm32, or a
    /// `tokio::time::interval` in tests).
    pub async fn sweep_timeouts(&self) -> Vec<String> {
        let now = self.clock.now_millis();
        let expired = {
            let state = self.state.lock().await;
            state.pending.expired(now)
        };
        for request_id in &expired {
            self.time_out_request(request_id).await;
        }
        expired
    }

    async fn time_out_request(&self, request_id: &str) {
        let (port, entry) = {
            let mut state = self.state.lock().await;
            let entry = state.pending.take(request_id);
            let intent = state.progress_bus.unregister(request_id);
            self.apply_overlay_intent(&mut state, intent);
            (state.port.clone(), entry)
        };
        if let Some(entry) = entry {
            if let Some(resolve) = entry.resolve {
                resolve(Err(WalletError::request_timeout(request_id)));
            }
        }
        if let Some(port) = port {
            let _ = port.post(&ResponseEnvelopeOrRequest::Control(serde_json::json!({
                "type": "PM_CANCEL",
                "payload": {"requestId": request_id},
            })));
        }
    }

    /// `cancelRequest`: rejects the pending promise with `Cancelled`,
    /// unregisters the subscriber, recomputes the overlay, and
    /// best-effort notifies the wallet.
    pub async fn cancel_request(&self, request_id: &str) {
        let (port, entry) = {
            let mut state = self.state.lock().await;
            let entry = state.pending.take(request_id);
            let intent = state.progress_bus.unregister(request_id);
            self.apply_overlay_intent(&mut state, intent);
            (state.port.clone(), entry)
        };
        if let Some(entry) = entry {
            if let Some(resolve) = entry.resolve {
                resolve(Err(WalletError::cancelled(request_id)));
            }
        }
        if let Some(port) = port {
            let _ = port.post(&ResponseEnvelopeOrRequest::Control(serde_json::json!({
                "type": "PM_CANCEL",
                "payload": {"requestId": request_id},
            })));
        }
    }

    /// `cancelAll`: cancels every outstanding request locally, then
    /// instructs the wallet to do the same.
    pub async fn cancel_all(&self) {
        let ids: Vec<String> = {
            let state = self.state.lock().await;
            state.pending.ids()
        };
        for id in ids {
            self.cancel_request(&id).await;
        }
    }

    async fn show_frame_for_activation(&self) {
        let mut state = self.state.lock().await;
        state.overlay.show_fullscreen();
        let snapshot = state.overlay.get_state();
        self.bridge.apply_overlay(&snapshot);
    }

    async fn hide_frame_for_activation(&self) {
        let mut state = self.state.lock().await;
        let intent = state.progress_bus.aggregate_intent();
        if intent != PhaseIntent::Show {
            state.overlay.hide();
        }
        let snapshot = state.overlay.get_state();
        self.bridge.apply_overlay(&snapshot);
    }

    fn apply_overlay_intent(&self, state: &mut RouterState, intent: PhaseIntent) {
        match intent {
            PhaseIntent::Show => state.overlay.show_fullscreen(),
            PhaseIntent::Hide => state.overlay.hide(),
            PhaseIntent::None => return,
        }
        self.bridge.apply_overlay(&state.overlay.get_state());
    }

    pub async fn overlay_state(&self) -> crate::overlay::OverlayState {
        self.state.lock().await.overlay.get_state()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBridge;
    use crate::clock::SystemClock;
    use crate::envelope::{ProgressStatus, ResultPayload};
    use crate::transport::TransportConfig;
    use std::collections::HashMap;

    fn make_router() -> (Arc<MockBridge>, WalletIframeRouter<MockBridge, SystemClock>) {
        let bridge = Arc::new(MockBridge::new());
        bridge.set_booted(true);
        let config = TransportConfig::new(
            "https://wallet.example.com",
            "https://wallet.example.com/sdk/service.html",
            2_000,
        )
        .unwrap();
        let transport = IframeTransport::new(config, bridge.clone(), Arc::new(SystemClock));
        let router = WalletIframeRouter::new(bridge.clone(), Arc::new(SystemClock), transport, WalletConfig::default());
        (bridge, router)
    }

    #[tokio::test]
    async fn init_is_idempotent_and_sends_config_once() {
        let (bridge, router) = make_router();
        let (r1, r2, r3) = tokio::join!(router.init(), router.init(), router.init());
        r1.unwrap();
        r2.unwrap();
        r3.unwrap();
        let port = bridge.last_port.lock().unwrap().clone().unwrap();
        let sent = port.sent.lock().unwrap();
        let config_posts = sent
            .iter()
            .filter(|m| matches!(m, ResponseEnvelopeOrRequest::Control(v) if v["type"] == "PM_SET_CONFIG"))
            .count();
        assert_eq!(config_posts, 1);
    }

    // `PlatformBridge` is `?Send` (its wasm32 impl holds non-Send web-sys
    // handles), so a request in flight alongside the test driver runs as a
    // `spawn_local` task under a `LocalSet` rather than `tokio::spawn`.

    #[tokio::test]
    async fn cancel_request_rejects_with_cancelled_and_clears_overlay() {
        let (_bridge, router) = make_router();
        router.init().await.unwrap();
        let router = Arc::new(router);

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let r2 = router.clone();
                let handle = tokio::task::spawn_local(async move {
                    r2.post(RequestPayload::GetLoginState, RequestOptions::default(), None)
                        .await
                });

                tokio::task::yield_now().await;
                let pending_id = {
                    let state = router.state.lock().await;
                    state.pending.ids().into_iter().next()
                };
                if let Some(id) = pending_id {
                    router.cancel_request(&id).await;
                }
                let result = handle.await.unwrap();
                assert!(matches!(result, Err(e) if e.kind == ErrorKind::Cancelled));
            })
            .await;
    }

    #[tokio::test]
    async fn sticky_option_suppresses_overlay_hide_on_terminal_result() {
        let (bridge, router) = make_router();
        router.init().await.unwrap();
        let router = Arc::new(router);

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let r2 = router.clone();
                let handle = tokio::task::spawn_local(async move {
                    r2.post(
                        RequestPayload::GetLoginState,
                        RequestOptions { sticky: true },
                        None,
                    )
                    .await
                });
                tokio::task::yield_now().await;

                let request_id = {
                    let port = bridge.last_port.lock().unwrap().clone().unwrap();
                    let sent = port.sent.lock().unwrap();
                    sent.iter()
                        .find_map(|m| match m {
                            ResponseEnvelopeOrRequest::Request(r) => Some(r.request_id.clone()),
                            _ => None,
                        })
                        .unwrap()
                };

                router
                    .on_port_message(ResponseEnvelope::Progress {
                        request_id: request_id.clone(),
                        payload: ProgressPayload {
                            step: 1,
                            phase: "user-confirmation".into(),
                            status: ProgressStatus::Progress,
                            message: None,
                            error: None,
                            extra: HashMap::new(),
                        },
                    })
                    .await;
                assert_eq!(
                    router.overlay_state().await.mode,
                    crate::overlay::OverlayMode::Fullscreen
                );

                router
                    .on_port_message(ResponseEnvelope::Result {
                        request_id,
                        payload: ResultPayload {
                            ok: true,
                            result: serde_json::json!({"active": false}),
                        },
                    })
                    .await;

                // sticky: overlay must remain visible even after the terminal result.
                assert!(router.overlay_state().await.visible);
                handle.await.unwrap().unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn timeout_rejects_and_best_effort_cancels() {
        let (bridge, router) = make_router();
        router.init().await.unwrap();
        let router = Arc::new(router);

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let r2 = router.clone();
                let handle = tokio::task::spawn_local(async move {
                    r2.post(RequestPayload::GetLoginState, RequestOptions::default(), None)
                        .await
                });
                tokio::task::yield_now().await;

                router.sweep_timeouts().await;
                // First sweep with a fresh request won't be expired yet (deadline
                // uses wall-clock ms from SystemClock); force expiry by directly
                // invoking the timeout path on the known pending id.
                let pending_id = {
                    let state = router.state.lock().await;
                    state.pending.ids().into_iter().next()
                };
                if let Some(id) = pending_id {
                    router.time_out_request(&id).await;
                }
                let result = handle.await.unwrap();
                assert!(matches!(result, Err(e) if e.kind == ErrorKind::RequestTimeout));

                let port = bridge.last_port.lock().unwrap().clone().unwrap();
                let sent = port.sent.lock().unwrap();
                assert!(sent.iter().any(
                    |m| matches!(m, ResponseEnvelopeOrRequest::Control(v) if v["type"] == "PM_CANCEL")
                ));
            })
            .await;
    }
}
