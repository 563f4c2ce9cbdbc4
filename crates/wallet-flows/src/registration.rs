//! Registration flow (new account + first passkey).
//!
//! A struct holding injected collaborators, with one public entry point
//! that drives a numbered sequence of progress-emitting steps and
//! unwinds a typed rollback record on failure.

use crate::account_id::{validate_account_id, AccountIdPolicy};
use crate::collaborators::{
    ContractClient, CreateAccountAndRegisterRequest, CredentialCeremony, KeyValueStore,
    RelayerClient, SignerWorkerClient, VrfWorkerClient,
};
use crate::models::{AuthenticatorRecord, RegistrationResult, UserRecord, VrfRegistrationSummary};
use std::sync::Arc;
use tracing::info;
use wallet_iframe_core::clock::Clock;
use wallet_iframe_core::error::{classify_external_error, ErrorKind, WalletError, WalletResult};
use wallet_iframe_core::host::{CancelToken, ProgressSink};

/// Tracks what has actually happened on each collaborator so failure
/// handling can unwind exactly as far as it got, rather than threading
/// ad hoc boolean flags through the function body.
#[derive(Debug, Clone, Default)]
pub struct RegistrationRollbackState {
    pub account_created: bool,
    pub contract_registered: bool,
    pub database_stored: bool,
    pub contract_transaction_id: Option<String>,
}

impl RegistrationRollbackState {
    /// Reverses whatever completed, in reverse order. The chain side is
    /// immutable once broadcast: a registered contract call is reported
    /// in the returned error's details but never undone.
    async fn rollback(
        &self,
        account_id: &str,
        vrf_worker: &dyn VrfWorkerClient,
        store: &dyn KeyValueStore,
    ) {
        vrf_worker.clear_session().await;
        if self.database_stored {
            if let Err(err) = store.delete_user_and_authenticators(account_id).await {
                tracing::warn!(account_id, error = %err, "rollback: failed to delete persisted records");
            }
        }
        if self.contract_registered {
            tracing::warn!(
                account_id,
                transaction_id = self.contract_transaction_id.as_deref().unwrap_or(""),
                "rollback: contract-side registration is immutable, reporting only"
            );
        }
    }
}

pub struct RegistrationFlow {
    contract: Arc<dyn ContractClient>,
    relayer: Arc<dyn RelayerClient>,
    vrf_worker: Arc<dyn VrfWorkerClient>,
    signer_worker: Arc<dyn SignerWorkerClient>,
    ceremony: Arc<dyn CredentialCeremony>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    account_id_policy: AccountIdPolicy,
    shamir_enabled: bool,
    rp_id: String,
}

impl RegistrationFlow {
    pub fn new(
        contract: Arc<dyn ContractClient>,
        relayer: Arc<dyn RelayerClient>,
        vrf_worker: Arc<dyn VrfWorkerClient>,
        signer_worker: Arc<dyn SignerWorkerClient>,
        ceremony: Arc<dyn CredentialCeremony>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        account_id_policy: AccountIdPolicy,
        shamir_enabled: bool,
        rp_id: impl Into<String>,
    ) -> Self {
        Self {
            contract,
            relayer,
            vrf_worker,
            signer_worker,
            ceremony,
            store,
            clock,
            account_id_policy,
            shamir_enabled,
            rp_id: rp_id.into(),
        }
    }

    pub async fn run(
        &self,
        account_id: &str,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> WalletResult<RegistrationResult> {
        let mut rollback = RegistrationRollbackState::default();

        match self.run_inner(account_id, progress, cancel, &mut rollback).await {
            Ok(result) => Ok(result),
            Err(err) => {
                rollback.rollback(account_id, self.vrf_worker.as_ref(), self.store.as_ref()).await;
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        account_id: &str,
        progress: &ProgressSink,
        cancel: &CancelToken,
        rollback: &mut RegistrationRollbackState,
    ) -> WalletResult<RegistrationResult> {
        // Step 1: validate, then the actual WebAuthn ceremony.
        progress.emit(1, "webauthn-verification", None);
        validate_account_id(account_id, &self.account_id_policy)
            .map_err(|e| WalletError::new(ErrorKind::AccountUnavailable, e.to_string()))?;
        if cancel.is_cancelled() {
            return Err(WalletError::new(ErrorKind::Cancelled, "registration cancelled"));
        }
        // Account-view failures are treated as "available" (tolerates
        // heterogeneous RPC error formats from the view call).
        let exists = self.contract.account_exists(account_id).await.unwrap_or(false);
        if exists {
            return Err(WalletError::new(
                ErrorKind::AccountUnavailable,
                "an account already exists for this id, try logging in",
            ));
        }
        let bootstrap_challenge = self
            .vrf_worker
            .generate_bootstrap_challenge(account_id, &self.rp_id)
            .await?;
        let credential = self
            .ceremony
            .create(&bootstrap_challenge.vrf_output_b64u, account_id)
            .await
            .map_err(|e| classify_external_error(&e.message))?;
        if cancel.is_cancelled() {
            return Err(WalletError::new(ErrorKind::Cancelled, "registration cancelled"));
        }

        // Step 2: derive the deterministic VRF and NEAR keypairs from
        // the credential's dual PRF outputs.
        progress.emit(2, "key-generation", None);
        let vrf_public_key = self
            .vrf_worker
            .derive_and_hold_keypair(&credential.prf_output_1_b64u)
            .await?;
        let derived_keypair = self
            .signer_worker
            .derive_near_keypair(&credential.prf_output_2_b64u)
            .await?;

        // Step 3: check contract admissibility, then create the account
        // and register it on chain atomically via the relayer.
        progress.emit(3, "account-verification", None);
        let admissible = self
            .contract
            .verify_registration_admissible(account_id, &vrf_public_key)
            .await?;
        if !admissible {
            return Err(WalletError::new(
                ErrorKind::ContractRejection,
                "contract reports this registration is not admissible",
            ));
        }
        let response = self
            .relayer
            .create_account_and_register(CreateAccountAndRegisterRequest {
                account_id: account_id.to_string(),
                near_public_key: derived_keypair.public_key.clone(),
                registration_credential: credential.clone(),
                bootstrap_vrf_challenge: bootstrap_challenge,
                deterministic_vrf_public_key: vrf_public_key.clone(),
                authenticator_options: serde_json::Value::Null,
            })
            .await
            .map_err(|e| classify_external_error(&e.message))?;
        rollback.account_created = true;
        rollback.contract_registered = true;
        rollback.contract_transaction_id = Some(response.transaction_id.clone());

        // Step 4: persist.
        progress.emit(4, "database-storage", None);
        let now = self.clock.wall_millis();
        let encrypted_vrf_keypair = self.vrf_worker.export_encrypted_keypair().await?;
        let user = UserRecord {
            account_id: account_id.to_string(),
            device_number: 1,
            client_near_public_key: derived_keypair.public_key.clone(),
            passkey_credential_id: credential.credential_id.clone(),
            encrypted_vrf_keypair: encrypted_vrf_keypair.clone(),
            server_encrypted_vrf_keypair: None,
            last_updated: now,
            last_login: None,
        };
        let authenticator = AuthenticatorRecord {
            account_id: account_id.to_string(),
            device_number: 1,
            credential_id: credential.credential_id.clone(),
            credential_public_key: credential.credential_public_key.clone(),
            transports: credential.transports.clone(),
            vrf_public_key: vrf_public_key.clone(),
            registered_at: now,
            synced_at: now,
        };
        self.store
            .put_user_and_authenticator(user, authenticator)
            .await?;
        rollback.database_stored = true;

        // Step 5: unlock the freshly-derived VRF session and mark this
        // account as the current user.
        progress.emit(5, "registration-complete", None);
        self.vrf_worker
            .unlock_with_prf(account_id, &credential.prf_output_1_b64u, &encrypted_vrf_keypair)
            .await?;
        self.store.set_current_user(account_id).await?;

        info!(account_id, shamir_enabled = self.shamir_enabled, "registration complete");

        Ok(RegistrationResult {
            success: true,
            near_account_id: account_id.to_string(),
            client_near_public_key: derived_keypair.public_key,
            transaction_id: Some(response.transaction_id),
            vrf_registration: VrfRegistrationSummary {
                vrf_public_key,
                encrypted_vrf_keypair,
                contract_verified: response.contract_verified,
            },
        })
    }
}
