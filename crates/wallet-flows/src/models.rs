//! Data shapes passed between flows, collaborators, and the persisted
//! store. These are the typed equivalents of the loose option bags the
//! original host-page SDK passed around; every field that crosses a
//! collaborator boundary is named and closed here instead of traveling
//! as an untyped JSON blob.

use serde::{Deserialize, Serialize};

/// The client-side encrypted form of a VRF keypair, always written
/// alongside a matching authenticator record for the same account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedVrfKeypair {
    pub encrypted_vrf_data_b64u: String,
    pub chacha20_nonce_b64u: String,
}

/// The server-locked form of the same VRF blob's KEK, present only when
/// Shamir 3-pass unlock is configured for this account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEncryptedVrfKeypair {
    pub ciphertext_vrf_b64u: String,
    pub kek_s_b64u: String,
}

/// One passkey bound to one device slot of one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticatorRecord {
    pub account_id: String,
    pub device_number: u32,
    pub credential_id: String,
    pub credential_public_key: String,
    pub transports: Vec<String>,
    pub vrf_public_key: String,
    pub registered_at: u64,
    pub synced_at: u64,
}

/// The per-device record paired with each [`AuthenticatorRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub account_id: String,
    pub device_number: u32,
    pub client_near_public_key: String,
    pub passkey_credential_id: String,
    pub encrypted_vrf_keypair: EncryptedVrfKeypair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_encrypted_vrf_keypair: Option<ServerEncryptedVrfKeypair>,
    pub last_updated: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<u64>,
}

/// The data carried from Device2 to Device1 as a scanned QR code. The
/// account id is absent until Device2 learns it from the chain (Option F).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub device2_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub timestamp: u64,
    pub version: String,
}

pub const QR_PAYLOAD_VERSION: &str = "1.0";

/// Closed device-linking phase enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceLinkingPhase {
    Idle,
    QrGenerated,
    Polling,
    AddkeyDetected,
    Registration,
    LinkingComplete,
    Error,
}

/// A result of a successful WebAuthn ceremony, including the dual-PRF
/// extension outputs used as symmetric/signing-key derivation material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebauthnCredential {
    pub credential_id: String,
    pub credential_public_key: String,
    pub transports: Vec<String>,
    pub prf_output_1_b64u: String,
    pub prf_output_2_b64u: String,
}

/// The outcome of a registration flow, mirroring the wire result shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrfRegistrationSummary {
    pub vrf_public_key: String,
    pub encrypted_vrf_keypair: EncryptedVrfKeypair,
    pub contract_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub success: bool,
    pub near_account_id: String,
    pub client_near_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub vrf_registration: VrfRegistrationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub account_id: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDeviceResult {
    pub account_id: String,
    pub device_number: u32,
}

/// The contract's view of a bootstrapped VRF challenge, bound to a
/// specific account, relying-party, and recent block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrfChallenge {
    pub vrf_output_b64u: String,
    pub vrf_proof_b64u: String,
    pub vrf_public_key_b64u: String,
    pub user_id: String,
    pub rp_id: String,
    pub block_height: u64,
    pub block_hash_b64u: String,
}

/// A signed NEAR transaction as returned by the signer worker. The wire
/// form from the worker is a structurally-shaped JSON object (a
/// `transaction` field, a `signature` field, and the borsh-serialized
/// bytes as a plain array); this rehydrates it into a typed value
/// instead of leaving callers to field-probe `serde_json::Value`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction_b64u: String,
    pub signature_b64u: String,
    pub borsh_bytes: Vec<u8>,
}

impl TryFrom<serde_json::Value> for SignedTransaction {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        let transaction_b64u = value
            .get("transaction")
            .and_then(|v| v.as_str())
            .ok_or("missing 'transaction' field")?
            .to_string();
        let signature_b64u = value
            .get("signature")
            .and_then(|v| v.as_str())
            .ok_or("missing 'signature' field")?
            .to_string();
        let borsh_bytes = value
            .get("borshBytes")
            .and_then(|v| v.as_array())
            .ok_or("missing 'borshBytes' array")?
            .iter()
            .map(|n| n.as_u64().map(|n| n as u8).ok_or("borshBytes entry is not a byte"))
            .collect::<Result<Vec<u8>, _>>()?;
        Ok(SignedTransaction {
            transaction_b64u,
            signature_b64u,
            borsh_bytes,
        })
    }
}
