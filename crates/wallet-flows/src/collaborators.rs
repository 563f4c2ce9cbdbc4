//! Trait contracts for everything a flow needs but does not implement:
//! the smart contract, the chain RPC, the relayer, the WASM signer/VRF
//! workers, the WebAuthn ceremony, and the persisted key-value store.
//!
//! Flows hold these as `Arc<dyn Trait>` injected at construction, the
//! same dependency-injection shape `SessionManager::new(state,
//! ui_callback)` uses to keep orchestration logic free of any concrete
//! transport or storage dependency — so registration, login, and
//! device-linking are unit-testable against in-memory fakes with no
//! browser, chain, or worker present.

use crate::models::{
    AuthenticatorRecord, EncryptedVrfKeypair, ServerEncryptedVrfKeypair, SignedTransaction,
    UserRecord, VrfChallenge, WebauthnCredential,
};
use async_trait::async_trait;
use wallet_iframe_core::error::WalletResult;

/// Read-only and mutating calls against the on-chain contract.
#[async_trait]
pub trait ContractClient: Send + Sync {
    async fn account_exists(&self, account_id: &str) -> WalletResult<bool>;

    /// Read-only admissibility check run during registration. Any
    /// transport/deserialization failure is treated by the caller as
    /// "available" — this trait returns the raw result and lets the
    /// flow apply that tolerance policy explicitly.
    async fn verify_registration_admissible(
        &self,
        account_id: &str,
        vrf_public_key: &str,
    ) -> WalletResult<bool>;

    /// The device-linking view: has `device2_public_key` been mapped to
    /// an account yet, and if so what device slot comes next?
    async fn device_linking_mapping(
        &self,
        device2_public_key: &str,
    ) -> WalletResult<Option<DeviceLinkingMapping>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLinkingMapping {
    pub account_id: String,
    pub next_device_number: u32,
}

/// The relayer that atomically creates an account and broadcasts
/// `register_user` in one transaction, sponsoring gas on the user's
/// behalf.
#[async_trait]
pub trait RelayerClient: Send + Sync {
    async fn create_account_and_register(
        &self,
        request: CreateAccountAndRegisterRequest,
    ) -> WalletResult<CreateAccountAndRegisterResponse>;
}

#[derive(Debug, Clone)]
pub struct CreateAccountAndRegisterRequest {
    pub account_id: String,
    pub near_public_key: String,
    pub registration_credential: WebauthnCredential,
    pub bootstrap_vrf_challenge: VrfChallenge,
    pub deterministic_vrf_public_key: String,
    pub authenticator_options: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CreateAccountAndRegisterResponse {
    pub transaction_id: String,
    pub contract_verified: bool,
}

/// Direct chain RPC access used outside the relayer path — device
/// linking's key-swap and re-registration transactions are signed and
/// broadcast by Device2 itself, with no relayer sponsoring gas.
#[async_trait]
pub trait ChainRpcClient: Send + Sync {
    async fn access_key_nonce(&self, account_id: &str, public_key: &str) -> WalletResult<u64>;
    async fn latest_block_hash_b64u(&self) -> WalletResult<String>;
    async fn broadcast_signed_transaction(&self, tx: &SignedTransaction) -> WalletResult<String>;
}

/// The VRF WASM worker: owns the process-wide "active VRF session"
/// resource as an explicit singleton with its own lifecycle.
#[async_trait]
pub trait VrfWorkerClient: Send + Sync {
    async fn generate_bootstrap_challenge(
        &self,
        account_id: &str,
        rp_id: &str,
    ) -> WalletResult<VrfChallenge>;

    /// Derives the deterministic VRF keypair from PRF output 1 and keeps
    /// it resident in worker memory; returns its public key.
    async fn derive_and_hold_keypair(&self, prf_output_1_b64u: &str) -> WalletResult<String>;

    /// Decrypts and loads a previously-persisted VRF keypair for
    /// `account_id`, making it the active session.
    async fn unlock_with_prf(
        &self,
        account_id: &str,
        prf_output_1_b64u: &str,
        encrypted: &EncryptedVrfKeypair,
    ) -> WalletResult<()>;

    /// Coordinates with the Shamir relay to remove the server lock, then
    /// decrypts and loads the VRF keypair for `account_id`.
    async fn unlock_with_shamir(
        &self,
        account_id: &str,
        server_encrypted: &ServerEncryptedVrfKeypair,
    ) -> WalletResult<()>;

    /// True only while a session is active for exactly this account.
    async fn is_active_for(&self, account_id: &str) -> WalletResult<bool>;

    /// Exports the current session's encrypted form for persistence.
    async fn export_encrypted_keypair(&self) -> WalletResult<EncryptedVrfKeypair>;

    /// Clears the resident keypair (logout, or rollback on failure).
    async fn clear_session(&self);
}

/// The signer WASM worker: Ed25519 key derivation and transaction
/// signing, kept separate from the VRF worker since each runs its own
/// per-worker message loop.
#[async_trait]
pub trait SignerWorkerClient: Send + Sync {
    async fn derive_near_keypair(
        &self,
        prf_output_2_b64u: &str,
    ) -> WalletResult<DerivedNearKeypair>;

    async fn sign_transaction(&self, request: SignTransactionRequest) -> WalletResult<SignedTransaction>;

    /// A throwaway Ed25519 keypair with no PRF/VRF derivation behind it,
    /// used only as Device2's temporary access key in the
    /// account-unknown device-linking path. The private key material
    /// never leaves worker memory in a real deployment; here it is
    /// returned so the flow can hold and zero it itself.
    async fn generate_ephemeral_keypair(&self) -> WalletResult<(String, Vec<u8>)>;

    /// Signs with a raw, non-derived private key — the only way Device2
    /// can authorize the key-swap transaction with its temporary access
    /// key before any deterministic keypair exists for the account.
    async fn sign_with_raw_private_key(
        &self,
        private_key_bytes: &[u8],
        request: SignTransactionRequest,
    ) -> WalletResult<SignedTransaction>;
}

#[derive(Debug, Clone)]
pub struct DerivedNearKeypair {
    pub public_key: String,
    pub encrypted_private_key: EncryptedVrfKeypair,
}

#[derive(Debug, Clone)]
pub struct NearAction {
    pub kind: NearActionKind,
}

#[derive(Debug, Clone)]
pub enum NearActionKind {
    AddKey { public_key: String },
    DeleteKey { public_key: String },
    FunctionCall { method_name: String, args: serde_json::Value },
}

#[derive(Debug, Clone)]
pub struct SignTransactionRequest {
    pub signer_account_id: String,
    pub signer_public_key: String,
    pub nonce: u64,
    pub receiver_id: String,
    pub block_hash_b64u: String,
    pub actions: Vec<NearAction>,
}

/// One WebAuthn `create`/`get` ceremony, performed either in the wallet
/// document directly or proxied across the origin boundary.
#[async_trait]
pub trait CredentialCeremony: Send + Sync {
    async fn create(&self, challenge_b64u: &str, account_id: &str) -> WalletResult<WebauthnCredential>;
    async fn get(
        &self,
        challenge_b64u: &str,
        allow_credential_ids: &[String],
    ) -> WalletResult<WebauthnCredential>;
}

/// An injectable delay primitive, the flow-level equivalent of
/// `PlatformBridge::sleep` — device-linking's fixed polling interval and
/// registration retry delay both go through this instead of calling
/// `tokio::time::sleep` directly, so tests can swap in a no-op.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, millis: u64);
}

#[cfg(not(target_arch = "wasm32"))]
pub struct TokioSleeper;

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, millis: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
    }
}

/// The persisted store: user/authenticator records, encrypted VRF
/// blobs, and the "current user" pointer. Registration persistence is
/// an atomic write across all three record kinds.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put_user_and_authenticator(
        &self,
        user: UserRecord,
        authenticator: AuthenticatorRecord,
    ) -> WalletResult<()>;

    async fn delete_user_and_authenticators(&self, account_id: &str) -> WalletResult<()>;

    async fn get_user(&self, account_id: &str, device_number: u32) -> WalletResult<Option<UserRecord>>;

    async fn get_authenticators(&self, account_id: &str) -> WalletResult<Vec<AuthenticatorRecord>>;

    async fn set_current_user(&self, account_id: &str) -> WalletResult<()>;

    async fn current_user(&self) -> WalletResult<Option<String>>;

    async fn update_last_login(&self, account_id: &str, device_number: u32, at_millis: u64) -> WalletResult<()>;
}
