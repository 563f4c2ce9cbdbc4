//! Cross-origin WebAuthn ceremony bridge.
//!
//! A small set of flows (device linking, account recovery) need to run a
//! WebAuthn ceremony from a page that isn't the top-level parent — the
//! wallet document proxies the `navigator.credentials` call on its
//! behalf over `postMessage`, guarded by a fixed origin allow-list
//! rather than accepting any sender.

use crate::error::{ErrorKind, WalletError, WalletResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebauthnBridgeMessage {
    #[serde(rename = "WALLET_WEBAUTHN_CREATE")]
    Create {
        request_id: String,
        options: serde_json::Value,
    },
    #[serde(rename = "WALLET_WEBAUTHN_GET")]
    Get {
        request_id: String,
        options: serde_json::Value,
    },
    #[serde(rename = "WALLET_WEBAUTHN_CREATE_RESULT")]
    CreateResult {
        request_id: String,
        credential: serde_json::Value,
    },
    #[serde(rename = "WALLET_WEBAUTHN_GET_RESULT")]
    GetResult {
        request_id: String,
        credential: serde_json::Value,
    },
    #[serde(rename = "WALLET_WEBAUTHN_ERROR")]
    Error { request_id: String, message: String },
}

impl WebauthnBridgeMessage {
    pub fn request_id(&self) -> &str {
        match self {
            WebauthnBridgeMessage::Create { request_id, .. }
            | WebauthnBridgeMessage::Get { request_id, .. }
            | WebauthnBridgeMessage::CreateResult { request_id, .. }
            | WebauthnBridgeMessage::GetResult { request_id, .. }
            | WebauthnBridgeMessage::Error { request_id, .. } => request_id,
        }
    }
}

/// Rejects any sender whose origin isn't on the configured allow-list.
pub struct OriginGuard {
    allowed: Vec<String>,
}

impl OriginGuard {
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn check(&self, origin: &str) -> WalletResult<()> {
        if self.allowed.iter().any(|o| o == origin) {
            Ok(())
        } else {
            Err(WalletError::new(
                ErrorKind::PortMissing,
                format!("origin {origin} is not permitted to drive the webauthn bridge"),
            ))
        }
    }
}

/// Runs the actual `navigator.credentials.create`/`.get()` call on
/// behalf of a guarded cross-origin sender. Implemented for real with
/// `web-sys`'s `CredentialsContainer` on wasm32; swappable for tests.
#[async_trait(?Send)]
pub trait CeremonyRunner {
    async fn create(&self, options: serde_json::Value) -> WalletResult<serde_json::Value>;
    async fn get(&self, options: serde_json::Value) -> WalletResult<serde_json::Value>;
}

/// Handles one guarded inbound bridge message, returning the reply
/// message to post back to the sender's port (`None` for result/error
/// echoes that expect no further acknowledgement).
pub async fn handle_message<R: CeremonyRunner>(
    origin_guard: &OriginGuard,
    origin: &str,
    runner: &R,
    message: WebauthnBridgeMessage,
) -> Option<WebauthnBridgeMessage> {
    if let Err(err) = origin_guard.check(origin) {
        return Some(WebauthnBridgeMessage::Error {
            request_id: message.request_id().to_string(),
            message: err.message,
        });
    }

    match message {
        WebauthnBridgeMessage::Create { request_id, options } => {
            Some(match runner.create(options).await {
                Ok(credential) => WebauthnBridgeMessage::CreateResult { request_id, credential },
                Err(err) => WebauthnBridgeMessage::Error { request_id, message: err.message },
            })
        }
        WebauthnBridgeMessage::Get { request_id, options } => {
            Some(match runner.get(options).await {
                Ok(credential) => WebauthnBridgeMessage::GetResult { request_id, credential },
                Err(err) => WebauthnBridgeMessage::Error { request_id, message: err.message },
            })
        }
        // Result/error echoes are terminal; nothing replies to a reply.
        WebauthnBridgeMessage::CreateResult { .. }
        | WebauthnBridgeMessage::GetResult { .. }
        | WebauthnBridgeMessage::Error { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubRunner {
        fail: bool,
    }

    #[async_trait(?Send)]
    impl CeremonyRunner for StubRunner {
        async fn create(&self, _options: serde_json::Value) -> WalletResult<serde_json::Value> {
            if self.fail {
                Err(WalletError::new(ErrorKind::Unknown, "ceremony failed"))
            } else {
                Ok(serde_json::json!({"id": "cred-1"}))
            }
        }

        async fn get(&self, _options: serde_json::Value) -> WalletResult<serde_json::Value> {
            Ok(serde_json::json!({"id": "cred-2"}))
        }
    }

    #[test]
    fn origin_guard_rejects_unlisted_origin() {
        let guard = OriginGuard::new(["https://wallet.example.com"]);
        assert!(guard.check("https://evil.example.com").is_err());
        assert!(guard.check("https://wallet.example.com").is_ok());
    }

    #[tokio::test]
    async fn guarded_create_request_returns_result_message() {
        let guard = OriginGuard::new(["https://linker.example.com"]);
        let runner = StubRunner { fail: false };
        let reply = handle_message(
            &guard,
            "https://linker.example.com",
            &runner,
            WebauthnBridgeMessage::Create {
                request_id: "w1".into(),
                options: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
        assert!(matches!(reply, WebauthnBridgeMessage::CreateResult { .. }));
    }

    #[tokio::test]
    async fn unguarded_origin_short_circuits_to_error() {
        let guard = OriginGuard::new(["https://linker.example.com"]);
        let runner = StubRunner { fail: false };
        let reply = handle_message(
            &guard,
            "https://evil.example.com",
            &runner,
            WebauthnBridgeMessage::Get {
                request_id: "w2".into(),
                options: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
        assert!(matches!(reply, WebauthnBridgeMessage::Error { .. }));
    }

    #[tokio::test]
    async fn ceremony_failure_surfaces_as_error_message() {
        let guard = OriginGuard::new(["https://linker.example.com"]);
        let runner = StubRunner { fail: true };
        let reply = handle_message(
            &guard,
            "https://linker.example.com",
            &runner,
            WebauthnBridgeMessage::Create {
                request_id: "w3".into(),
                options: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
        assert!(matches!(reply, WebauthnBridgeMessage::Error { .. }));
    }

    #[tokio::test]
    async fn result_echo_produces_no_reply() {
        let guard = OriginGuard::new(["https://linker.example.com"]);
        let runner = StubRunner { fail: false };
        let reply = handle_message(
            &guard,
            "https://linker.example.com",
            &runner,
            WebauthnBridgeMessage::CreateResult {
                request_id: "w4".into(),
                credential: serde_json::json!({}),
            },
        )
        .await;
        assert!(reply.is_none());
    }
}
