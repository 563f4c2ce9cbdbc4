//! The configuration surface carried by `PM_SET_CONFIG`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NearNetwork {
    Testnet,
    Mainnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerConfig {
    pub account_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shamir3PassConfig {
    pub p_b64u: String,
    pub relay_server_url: String,
    pub apply_server_lock_route: String,
    pub remove_server_lock_route: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrfWorkerConfigs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shamir3pass: Option<Shamir3PassConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginPolicy {
    Single,
    MultipleSubdomains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorOptions {
    pub user_verification: UserVerification,
    pub origin_policy: OriginPolicy,
}

/// `PM_SET_CONFIG` payload. Every field is optional on the wire; absent
/// fields keep whatever the wallet host already has.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub near_rpc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub near_network: Option<NearNetwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relayer: Option<RelayerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf_worker_configs: Option<VrfWorkerConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rp_id_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_options: Option<AuthenticatorOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_registry: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

impl WalletConfig {
    /// The first RPC URL in a possibly comma-delimited list.
    pub fn primary_rpc_url(&self) -> Option<&str> {
        self.near_rpc_url
            .as_deref()
            .and_then(|s| s.split(',').map(str::trim).find(|s| !s.is_empty()))
    }
}

/// Timeouts and intervals baked in as defaults; only request/connect
/// timeout are overridable via `PM_SET_CONFIG`.
pub struct Defaults;

impl Defaults {
    pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 60_000;
    pub const REGISTRATION_RETRY_DELAY_MS: u64 = 2_000;
    pub const REGISTRATION_MAX_RETRIES: u32 = 5;
    pub const DEVICE_LINKING_SESSION_TTL_MS: u64 = 15 * 60 * 1000;
    pub const DEVICE_LINKING_POLL_INTERVAL_MS: u64 = 3_000;
    pub const TEMP_KEY_CLEANUP_MS: u64 = 15 * 60 * 1000;
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 20_000;
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 8_000;
    pub const DEFAULT_SDK_BASE_PATH: &'static str = "/sdk";

    /// `connect()`'s handshake safety timeout for the iframe `load` event.
    pub const IFRAME_LOAD_SAFETY_TIMEOUT_MS: u64 = 150;
}

/// Clamps and sanitizes an untrusted SDK asset base path.
///
/// `/a/../b` -> `/b`; a scheme-like prefix (`javascript:...`) is rejected
/// to an empty prefix; a trailing slash is stripped except for the root
/// path `"/"`.
pub fn sanitize_sdk_base_path(raw: &str) -> String {
    if raw.contains(':') {
        return String::new();
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}
