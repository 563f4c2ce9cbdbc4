//! Typed request/response/progress envelopes shared by the parent page
//! and the wallet service document.
//!
//! Every envelope is a closed, tagged `enum` rather than a loose,
//! partially-typed option bag, so `serde_json` rejects anything outside
//! the wire contract instead of silently forwarding unknown fields.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type RequestId = String;

/// Options that may accompany a request. Only `sticky` ever crosses the
/// origin boundary — everything else (callbacks, UI overrides) is
/// consumed locally by the router before `post`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sticky: bool,
}

/// The closed set of operations a parent application may request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RequestPayload {
    #[serde(rename = "PM_SET_CONFIG")]
    SetConfig(serde_json::Value),
    #[serde(rename = "PM_REGISTER")]
    Register { account_id: String },
    #[serde(rename = "PM_LOGIN")]
    Login { account_id: Option<String> },
    #[serde(rename = "PM_LOGOUT")]
    Logout,
    #[serde(rename = "PM_GET_LOGIN_STATE")]
    GetLoginState,
    #[serde(rename = "PM_EXECUTE_ACTION")]
    ExecuteAction(serde_json::Value),
    #[serde(rename = "PM_SIGN_AND_SEND_TXS")]
    SignAndSendTxs(serde_json::Value),
    #[serde(rename = "PM_SIGN_TXS_WITH_ACTIONS")]
    SignTxsWithActions(serde_json::Value),
    #[serde(rename = "PM_SEND_TRANSACTION")]
    SendTransaction(serde_json::Value),
    #[serde(rename = "PM_SIGN_NEP413")]
    SignNep413(serde_json::Value),
    #[serde(rename = "PM_SET_CONFIRM_BEHAVIOR")]
    SetConfirmBehavior(serde_json::Value),
    #[serde(rename = "PM_SET_CONFIRMATION_CONFIG")]
    SetConfirmationConfig(serde_json::Value),
    #[serde(rename = "PM_GET_CONFIRMATION_CONFIG")]
    GetConfirmationConfig,
    #[serde(rename = "PM_SET_THEME")]
    SetTheme { theme: String },
    #[serde(rename = "PM_PREFETCH_BLOCKHEIGHT")]
    PrefetchBlockheight,
    #[serde(rename = "PM_VIEW_ACCESS_KEYS")]
    ViewAccessKeys { account_id: String },
    #[serde(rename = "PM_HAS_PASSKEY")]
    HasPasskey { account_id: String },
    #[serde(rename = "PM_DELETE_DEVICE_KEY")]
    DeleteDeviceKey { account_id: String, device_number: u32 },
    #[serde(rename = "PM_EXPORT_NEAR_KEYPAIR")]
    ExportNearKeypair { account_id: String },
    #[serde(rename = "PM_EXPORT_NEAR_KEYPAIR_UI")]
    ExportNearKeypairUi { account_id: String },
    #[serde(rename = "PM_RECOVER_ACCOUNT_FLOW")]
    RecoverAccountFlow(serde_json::Value),
    #[serde(rename = "PM_START_DEVICE2_LINKING_FLOW")]
    StartDevice2LinkingFlow { account_id: Option<String> },
    #[serde(rename = "PM_STOP_DEVICE2_LINKING_FLOW")]
    StopDevice2LinkingFlow,
    #[serde(rename = "PM_LINK_DEVICE_WITH_SCANNED_QR_DATA")]
    LinkDeviceWithScannedQrData { qr_data: String },
    #[serde(rename = "PM_GET_RECENT_LOGINS")]
    GetRecentLogins,
    #[serde(rename = "PM_CANCEL")]
    Cancel { request_id: RequestId },
}

impl RequestPayload {
    /// Operations the parent knows will require a fresh WebAuthn user
    /// activation gesture, and must therefore preflight-expand the
    /// overlay before posting.
    pub fn requires_activation_preflight(&self) -> bool {
        matches!(
            self,
            RequestPayload::Register { .. }
                | RequestPayload::Login { .. }
                | RequestPayload::StartDevice2LinkingFlow { .. }
                | RequestPayload::SendTransaction(_)
                | RequestPayload::SignAndSendTxs(_)
                | RequestPayload::SignTxsWithActions(_)
                | RequestPayload::ExecuteAction(_)
                | RequestPayload::ExportNearKeypairUi { .. }
        )
    }
}

/// A request envelope sent from the parent to the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub payload: RequestPayload,
    #[serde(default)]
    pub options: RequestOptions,
}

/// Zero or more of these precede the terminal response for a given
/// `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub step: u32,
    pub phase: String,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Progress,
    Success,
    Error,
}

/// A terminal success payload: `{ok: true, result}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub ok: bool,
    pub result: serde_json::Value,
}

/// A terminal failure payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&crate::error::WalletError> for ErrorPayload {
    fn from(err: &crate::error::WalletError) -> Self {
        ErrorPayload {
            code: err.kind.code().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

/// The closed set of wallet -> parent envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseEnvelope {
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "PROGRESS")]
    Progress {
        request_id: RequestId,
        payload: ProgressPayload,
    },
    #[serde(rename = "PM_RESULT")]
    Result {
        request_id: RequestId,
        payload: ResultPayload,
    },
    #[serde(rename = "ERROR")]
    Error {
        request_id: RequestId,
        payload: ErrorPayload,
    },
}

impl ResponseEnvelope {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Ready => None,
            ResponseEnvelope::Progress { request_id, .. }
            | ResponseEnvelope::Result { request_id, .. }
            | ResponseEnvelope::Error { request_id, .. } => Some(request_id),
        }
    }
}
