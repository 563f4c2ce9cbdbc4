//! Wallet-side dispatcher: adopts the transferred port, demultiplexes
//! inbound request envelopes onto an injected [`RequestHandler`], tracks
//! in-flight cancellation, and turns handler results back into outbound
//! envelopes.
//!
//! Keeps protocol orchestration (envelope plumbing) separate from the
//! actual passkey/signing work behind a trait object — registration,
//! login, and device-linking live in a different crate and are injected
//! as one `Arc<dyn RequestHandler>`.

pub mod webauthn_bridge;

use crate::bridge::{PortHandle, ResponseEnvelopeOrRequest};
use crate::envelope::{
    ErrorPayload, ProgressPayload, ProgressStatus, RequestEnvelope, RequestId, RequestPayload,
    ResponseEnvelope, ResultPayload,
};
use crate::error::WalletError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a [`RequestHandler`] uses to emit zero or more PROGRESS envelopes
/// ahead of its terminal result.
#[derive(Clone)]
pub struct ProgressSink {
    request_id: RequestId,
    port: Arc<dyn PortHandle>,
}

impl ProgressSink {
    /// Exposed so flow crates can exercise a [`RequestHandler`] impl
    /// against a recording/mock port in their own unit tests without
    /// standing up a whole [`WalletHost`].
    pub fn new(request_id: impl Into<RequestId>, port: Arc<dyn PortHandle>) -> Self {
        Self {
            request_id: request_id.into(),
            port,
        }
    }

    pub fn emit(&self, step: u32, phase: impl Into<String>, message: Option<String>) {
        let payload = ProgressPayload {
            step,
            phase: phase.into(),
            status: ProgressStatus::Progress,
            message,
            error: None,
            extra: HashMap::new(),
        };
        let _ = self.port.post(&ResponseEnvelopeOrRequest::Response(ResponseEnvelope::Progress {
            request_id: self.request_id.clone(),
            payload,
        }));
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// A cooperative cancellation flag a handler polls between awaited steps
/// of a multi-step ceremony (registration retries, device-linking polling).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// A token that is already cancelled, for callers racing a cancel
    /// against dispatch (and for flow tests that assert cooperative
    /// cancellation without wiring up a whole [`WalletHost`]).
    pub fn new_cancelled() -> Self {
        let token = Self::default();
        token.cancel();
        token
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The seam between envelope plumbing and actual wallet operations.
/// Implemented by the flow orchestrator that owns registration, login,
/// and device-linking.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        payload: RequestPayload,
        progress: ProgressSink,
        cancel: CancelToken,
    ) -> Result<serde_json::Value, WalletError>;
}

pub struct WalletHost<H: RequestHandler> {
    handler: Arc<H>,
    cancel_tokens: Mutex<HashMap<RequestId, CancelToken>>,
}

impl<H: RequestHandler + 'static> WalletHost<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            cancel_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Routes one inbound request envelope, posting PROGRESS/RESULT/ERROR
    /// back through `port` as the handler runs.
    pub async fn on_request(&self, envelope: RequestEnvelope, port: Arc<dyn PortHandle>) {
        if let RequestPayload::Cancel { request_id } = &envelope.payload {
            self.cancel(request_id).await;
            return;
        }

        let request_id = envelope.request_id.clone();
        let cancel = CancelToken::default();
        self.cancel_tokens
            .lock()
            .await
            .insert(request_id.clone(), cancel.clone());

        let sink = ProgressSink {
            request_id: request_id.clone(),
            port: port.clone(),
        };
        let result = self.handler.handle(envelope.payload, sink, cancel).await;
        self.cancel_tokens.lock().await.remove(&request_id);

        let response = match result {
            Ok(value) => ResponseEnvelope::Result {
                request_id,
                payload: ResultPayload { ok: true, result: value },
            },
            Err(err) => ResponseEnvelope::Error {
                request_id,
                payload: ErrorPayload::from(&err),
            },
        };
        let _ = port.post(&ResponseEnvelopeOrRequest::Response(response));
    }

    async fn cancel(&self, request_id: &str) {
        if let Some(token) = self.cancel_tokens.lock().await.get(request_id) {
            token.cancel();
        }
    }

    pub async fn is_cancelled(&self, request_id: &str) -> bool {
        self.cancel_tokens
            .lock()
            .await
            .get(request_id)
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::RecordedPort;
    use crate::error::ErrorKind;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(
            &self,
            payload: RequestPayload,
            progress: ProgressSink,
            _cancel: CancelToken,
        ) -> Result<serde_json::Value, WalletError> {
            progress.emit(1, "user-confirmation", None);
            match payload {
                RequestPayload::GetLoginState => Ok(serde_json::json!({"active": false})),
                RequestPayload::Register { account_id } => {
                    Err(WalletError::new(ErrorKind::CredentialExists, account_id))
                }
                _ => Ok(serde_json::Value::Null),
            }
        }
    }

    fn envelope(request_id: &str, payload: RequestPayload) -> RequestEnvelope {
        RequestEnvelope {
            request_id: request_id.to_string(),
            payload,
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn successful_handler_emits_progress_then_result() {
        let host = WalletHost::new(Arc::new(EchoHandler));
        let port = Arc::new(RecordedPort::default());
        host.on_request(envelope("r1", RequestPayload::GetLoginState), port.clone())
            .await;

        let sent = port.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[0],
            ResponseEnvelopeOrRequest::Response(ResponseEnvelope::Progress { .. })
        ));
        assert!(matches!(
            &sent[1],
            ResponseEnvelopeOrRequest::Response(ResponseEnvelope::Result { .. })
        ));
    }

    #[tokio::test]
    async fn failing_handler_emits_error_envelope_with_mapped_code() {
        let host = WalletHost::new(Arc::new(EchoHandler));
        let port = Arc::new(RecordedPort::default());
        host.on_request(
            envelope(
                "r2",
                RequestPayload::Register { account_id: "alice.testnet".into() },
            ),
            port.clone(),
        )
        .await;

        let sent = port.sent.lock().unwrap();
        match &sent[1] {
            ResponseEnvelopeOrRequest::Response(ResponseEnvelope::Error { payload, .. }) => {
                assert_eq!(payload.code, "CREDENTIAL_EXISTS");
            }
            other => panic!("expected error envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pm_cancel_marks_the_tracked_token() {
        let host = WalletHost::new(Arc::new(EchoHandler));
        let cancel = CancelToken::default();
        host.cancel_tokens
            .lock()
            .await
            .insert("r3".to_string(), cancel.clone());
        host.cancel("r3").await;
        assert!(cancel.is_cancelled());
    }
}
