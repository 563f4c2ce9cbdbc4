//! Browser-resident transport, overlay, and dispatch plumbing for a
//! WebAuthn-based wallet that lives in a hidden cross-origin iframe.
//!
//! This crate owns the parent/wallet postMessage protocol: typed
//! envelopes, the `MessagePort` handshake and its retry schedule, the
//! overlay visibility state machine, per-request progress aggregation,
//! and the wallet-side request dispatcher. It does not know how to
//! register a passkey or sign a transaction — those ceremonies are
//! injected as a [`host::RequestHandler`] from a separate crate.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod host;
pub mod overlay;
pub mod pending;
pub mod progress_bus;
pub mod router;
pub mod transport;

pub use bridge::{PlatformBridge, PortHandle, ResponseEnvelopeOrRequest};
pub use clock::{Clock, FakeClock, MonotonicCounter, SystemClock};
pub use config::{Defaults, WalletConfig};
pub use envelope::{
    ErrorPayload, ProgressPayload, ProgressStatus, RequestEnvelope, RequestOptions,
    RequestPayload, ResponseEnvelope, ResultPayload,
};
pub use error::{ErrorKind, WalletError, WalletResult};
pub use host::{CancelToken, ProgressSink, RequestHandler, WalletHost};
pub use overlay::{OverlayController, OverlayMode, OverlayState, Rect};
pub use progress_bus::{PhaseIntent, ProgressBus};
pub use router::WalletIframeRouter;
pub use transport::{IframeTransport, TransportConfig};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Entry point invoked from the parent page's bundle once the wasm
/// module has loaded.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}
