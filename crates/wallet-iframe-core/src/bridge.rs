//! `PlatformBridge`: the seam between the protocol-level state machines
//! (transport handshake, overlay writer, webauthn bridge) and the real
//! DOM/MessagePort operations they drive.
//!
//! UI and DOM side effects are abstracted behind a trait object so the
//! retry/backoff and overlay state machines are unit-testable on the
//! host target, with a real `web-sys`-backed implementation only
//! compiled for `wasm32`.

use crate::envelope::ResponseEnvelope;
use crate::error::WalletResult;
use crate::overlay::OverlayState;
use async_trait::async_trait;

/// An opaque handle to a transferred `MessagePort` (or, in tests, an
/// in-memory channel endpoint).
pub trait PortHandle: Send + Sync + std::fmt::Debug {
    /// Serializes and posts an envelope through the port.
    fn post(&self, envelope: &ResponseEnvelopeOrRequest) -> WalletResult<()>;
}

/// Either direction of envelope a port can carry; kept generic so the
/// same [`PortHandle`] trait serves both the parent's outbound requests
/// and the wallet host's outbound responses.
#[derive(Debug, Clone)]
pub enum ResponseEnvelopeOrRequest {
    Response(ResponseEnvelope),
    Request(crate::envelope::RequestEnvelope),
    Control(serde_json::Value),
}

/// DOM/browser operations the transport, overlay, and webauthn bridge
/// need. Implemented for real by `wasm::WebSysBridge` (wasm32 only) and
/// by `mock::MockBridge` for host-target tests.
#[async_trait(?Send)]
pub trait PlatformBridge {
    /// Mounts (idempotently) the hidden wallet service iframe at the
    /// given URL and returns once the element exists in the DOM. Does
    /// not wait for the `load` event.
    async fn mount_iframe(&self, wallet_service_url: &str) -> WalletResult<()>;

    /// Resolves once the iframe's `load` event has fired, or after
    /// `safety_timeout_ms` elapses, whichever comes first.
    async fn await_iframe_load(&self, safety_timeout_ms: u64) -> WalletResult<()>;

    /// True once a `SERVICE_HOST_BOOTED` hint has been observed from the
    /// wallet origin.
    fn has_booted_hint(&self) -> bool;

    /// Creates a `MessageChannel`, posts `{type:"CONNECT"}` plus one
    /// transferred port to the iframe's content window targeted at
    /// `wallet_origin`, and returns a handle to the retained port. On an
    /// opaque parent origin, implementations may retry once with a
    /// wildcard target.
    async fn post_connect(
        &self,
        wallet_origin: &str,
        allow_wildcard_fallback: bool,
    ) -> WalletResult<Box<dyn PortHandle>>;

    /// Applies overlay state to the iframe element's style/attributes.
    /// The controller never reads state back.
    fn apply_overlay(&self, state: &OverlayState);

    /// Sleeps for the given duration (wraps `setTimeout` on wasm32,
    /// `tokio::time::sleep` elsewhere), used by the retry/backoff loop.
    async fn sleep(&self, millis: u64);
}

#[cfg(not(target_arch = "wasm32"))]
pub mod mock;

#[cfg(target_arch = "wasm32")]
pub mod wasm;
