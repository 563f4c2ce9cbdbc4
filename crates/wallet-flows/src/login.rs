//! Login (unlock) flow and the Shamir-first/WebAuthn-fallback VRF
//! unlock helper shared with device linking's post-registration
//! auto-login step.

use crate::collaborators::{ContractClient, CredentialCeremony, KeyValueStore, VrfWorkerClient};
use crate::models::LoginResult;
use std::sync::Arc;
use tracing::info;
use wallet_iframe_core::clock::Clock;
use wallet_iframe_core::error::{ErrorKind, WalletError, WalletResult};
use wallet_iframe_core::host::{CancelToken, ProgressSink};

/// Unlocks the VRF keypair for `account_id`: Shamir 3-pass first when a
/// server-locked blob is present, falling back to a fresh WebAuthn `get`
/// and PRF-unlock. Shared verbatim between login and device-linking's
/// post-registration auto-login so the two flows never drift on this
/// one piece of duplicated behavior.
pub async fn unlock_vrf_keypair(
    account_id: &str,
    vrf_worker: &dyn VrfWorkerClient,
    ceremony: &dyn CredentialCeremony,
    store: &dyn KeyValueStore,
    progress: &ProgressSink,
) -> WalletResult<()> {
    let user = store
        .get_user(account_id, 1)
        .await?
        .ok_or_else(|| WalletError::new(ErrorKind::AccountUnavailable, "no user record for this account"))?;

    if let Some(server_encrypted) = &user.server_encrypted_vrf_keypair {
        progress.emit(2, "shamir-unlock", Some("attempting shamir unlock".into()));
        match vrf_worker.unlock_with_shamir(account_id, server_encrypted).await {
            Ok(()) => {
                if vrf_worker.is_active_for(account_id).await? {
                    return Ok(());
                }
            }
            Err(err) => {
                tracing::warn!(account_id, error = %err, "shamir unlock failed, falling back to webauthn");
            }
        }
    }

    progress.emit(3, "webauthn-authentication", Some("confirm with your passkey".into()));
    let authenticators = store.get_authenticators(account_id).await?;
    let allow_credential_ids: Vec<String> = authenticators.iter().map(|a| a.credential_id.clone()).collect();
    // A fresh login unlock has no freshness requirement of its own — any
    // locally-generated challenge is acceptable since this is not a
    // contract-verified ceremony.
    let credential = ceremony.get("login-challenge", &allow_credential_ids).await?;
    vrf_worker
        .unlock_with_prf(account_id, &credential.prf_output_1_b64u, &user.encrypted_vrf_keypair)
        .await
}

pub struct LoginFlow {
    contract: Arc<dyn ContractClient>,
    vrf_worker: Arc<dyn VrfWorkerClient>,
    ceremony: Arc<dyn CredentialCeremony>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl LoginFlow {
    pub fn new(
        contract: Arc<dyn ContractClient>,
        vrf_worker: Arc<dyn VrfWorkerClient>,
        ceremony: Arc<dyn CredentialCeremony>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            contract,
            vrf_worker,
            ceremony,
            store,
            clock,
        }
    }

    pub async fn run(
        &self,
        account_id: &str,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> WalletResult<LoginResult> {
        progress.emit(1, "account-verification", None);
        let user = self
            .store
            .get_user(account_id, 1)
            .await?
            .ok_or_else(|| WalletError::new(ErrorKind::AccountUnavailable, "no user record for this account"))?;
        let _ = self.contract.account_exists(account_id).await;
        if cancel.is_cancelled() {
            return Err(WalletError::new(ErrorKind::Cancelled, "login cancelled"));
        }

        unlock_vrf_keypair(
            account_id,
            self.vrf_worker.as_ref(),
            self.ceremony.as_ref(),
            self.store.as_ref(),
            progress,
        )
        .await?;

        progress.emit(4, "login-complete", None);
        let now = self.clock.wall_millis();
        self.store.update_last_login(account_id, 1, now).await?;
        self.store.set_current_user(account_id).await?;
        info!(account_id, "login complete");

        Ok(LoginResult {
            account_id: account_id.to_string(),
            public_key: user.client_near_public_key,
        })
    }
}

/// Clears the resident VRF session and nonce state without touching any
/// persisted record.
pub async fn logout(vrf_worker: &dyn VrfWorkerClient) {
    vrf_worker.clear_session().await;
}
