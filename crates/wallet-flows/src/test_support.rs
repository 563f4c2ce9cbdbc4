//! In-memory collaborator fakes shared by the flow unit tests (not
//! compiled outside `#[cfg(test)]`).

use crate::collaborators::*;
use crate::models::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use wallet_iframe_core::bridge::mock::RecordedPort;
use wallet_iframe_core::error::{ErrorKind, WalletError, WalletResult};
use wallet_iframe_core::host::ProgressSink;

pub fn test_progress_sink() -> ProgressSink {
    ProgressSink::new("test-request", Arc::new(RecordedPort::default()))
}

fn dummy_credential() -> WebauthnCredential {
    WebauthnCredential {
        credential_id: "cred-1".into(),
        credential_public_key: "pub-1".into(),
        transports: vec!["internal".into()],
        prf_output_1_b64u: "prf1".into(),
        prf_output_2_b64u: "prf2".into(),
    }
}

pub struct FakeContract {
    pub exists: Arc<AtomicBool>,
    pub admissible: Arc<AtomicBool>,
    pub mapping: Mutex<Option<DeviceLinkingMapping>>,
}

impl Default for FakeContract {
    fn default() -> Self {
        Self {
            exists: Arc::new(AtomicBool::new(false)),
            admissible: Arc::new(AtomicBool::new(true)),
            mapping: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ContractClient for FakeContract {
    async fn account_exists(&self, _account_id: &str) -> WalletResult<bool> {
        Ok(self.exists.load(Ordering::SeqCst))
    }

    async fn verify_registration_admissible(&self, _account_id: &str, _vrf_public_key: &str) -> WalletResult<bool> {
        Ok(self.admissible.load(Ordering::SeqCst))
    }

    async fn device_linking_mapping(&self, _device2_public_key: &str) -> WalletResult<Option<DeviceLinkingMapping>> {
        Ok(self.mapping.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeRelayer {
    pub should_fail: Arc<AtomicBool>,
}

#[async_trait]
impl RelayerClient for FakeRelayer {
    async fn create_account_and_register(
        &self,
        _request: CreateAccountAndRegisterRequest,
    ) -> WalletResult<CreateAccountAndRegisterResponse> {
        if self.should_fail.load(Ordering::SeqCst) {
            Err(WalletError::new(ErrorKind::Unknown, "relayer unavailable"))
        } else {
            Ok(CreateAccountAndRegisterResponse {
                transaction_id: "tx-1".into(),
                contract_verified: true,
            })
        }
    }
}

#[derive(Default)]
pub struct FakeVrfWorker {
    pub active_account: Mutex<Option<String>>,
    pub shamir_should_fail: Arc<AtomicBool>,
}

#[async_trait]
impl VrfWorkerClient for FakeVrfWorker {
    async fn generate_bootstrap_challenge(&self, account_id: &str, rp_id: &str) -> WalletResult<VrfChallenge> {
        Ok(VrfChallenge {
            vrf_output_b64u: "vrf-out".into(),
            vrf_proof_b64u: "vrf-proof".into(),
            vrf_public_key_b64u: "vrf-pub".into(),
            user_id: account_id.to_string(),
            rp_id: rp_id.to_string(),
            block_height: 1,
            block_hash_b64u: "hash-1".into(),
        })
    }

    async fn derive_and_hold_keypair(&self, _prf_output_1_b64u: &str) -> WalletResult<String> {
        Ok("vrf-pub-derived".into())
    }

    async fn unlock_with_prf(
        &self,
        account_id: &str,
        _prf_output_1_b64u: &str,
        _encrypted: &EncryptedVrfKeypair,
    ) -> WalletResult<()> {
        *self.active_account.lock().unwrap() = Some(account_id.to_string());
        Ok(())
    }

    async fn unlock_with_shamir(&self, account_id: &str, _server_encrypted: &ServerEncryptedVrfKeypair) -> WalletResult<()> {
        if self.shamir_should_fail.load(Ordering::SeqCst) {
            return Err(WalletError::new(ErrorKind::VrfUnlockFailure, "shamir unlock failed"));
        }
        *self.active_account.lock().unwrap() = Some(account_id.to_string());
        Ok(())
    }

    async fn is_active_for(&self, account_id: &str) -> WalletResult<bool> {
        Ok(self.active_account.lock().unwrap().as_deref() == Some(account_id))
    }

    async fn export_encrypted_keypair(&self) -> WalletResult<EncryptedVrfKeypair> {
        Ok(EncryptedVrfKeypair {
            encrypted_vrf_data_b64u: "enc-vrf".into(),
            chacha20_nonce_b64u: "nonce".into(),
        })
    }

    async fn clear_session(&self) {
        *self.active_account.lock().unwrap() = None;
    }
}

#[derive(Default)]
pub struct FakeSignerWorker;

#[async_trait]
impl SignerWorkerClient for FakeSignerWorker {
    async fn derive_near_keypair(&self, _prf_output_2_b64u: &str) -> WalletResult<DerivedNearKeypair> {
        Ok(DerivedNearKeypair {
            public_key: "ed25519:derived-pk".into(),
            encrypted_private_key: EncryptedVrfKeypair {
                encrypted_vrf_data_b64u: "enc-sk".into(),
                chacha20_nonce_b64u: "nonce-sk".into(),
            },
        })
    }

    async fn sign_transaction(&self, _request: SignTransactionRequest) -> WalletResult<SignedTransaction> {
        Ok(SignedTransaction {
            transaction_b64u: "tx".into(),
            signature_b64u: "sig".into(),
            borsh_bytes: vec![1, 2, 3],
        })
    }

    async fn generate_ephemeral_keypair(&self) -> WalletResult<(String, Vec<u8>)> {
        Ok(("ed25519:temp-pub".into(), vec![7; 32]))
    }

    async fn sign_with_raw_private_key(
        &self,
        _private_key_bytes: &[u8],
        _request: SignTransactionRequest,
    ) -> WalletResult<SignedTransaction> {
        Ok(SignedTransaction {
            transaction_b64u: "tx-raw".into(),
            signature_b64u: "sig-raw".into(),
            borsh_bytes: vec![4, 5, 6],
        })
    }
}

#[derive(Default)]
pub struct FakeSleeper;

#[async_trait]
impl Sleeper for FakeSleeper {
    async fn sleep(&self, _millis: u64) {}
}

#[derive(Default)]
pub struct FakeChainRpc {
    pub nonce: Arc<std::sync::atomic::AtomicU64>,
}

#[async_trait]
impl ChainRpcClient for FakeChainRpc {
    async fn access_key_nonce(&self, _account_id: &str, _public_key: &str) -> WalletResult<u64> {
        Ok(self.nonce.fetch_add(1, Ordering::SeqCst))
    }

    async fn latest_block_hash_b64u(&self) -> WalletResult<String> {
        Ok("block-hash".into())
    }

    async fn broadcast_signed_transaction(&self, _tx: &SignedTransaction) -> WalletResult<String> {
        Ok("tx-id".into())
    }
}

#[derive(Default)]
pub struct FakeCeremony {
    pub should_fail: Arc<AtomicBool>,
}

#[async_trait]
impl CredentialCeremony for FakeCeremony {
    async fn create(&self, _challenge_b64u: &str, _account_id: &str) -> WalletResult<WebauthnCredential> {
        if self.should_fail.load(Ordering::SeqCst) {
            Err(WalletError::new(ErrorKind::Unknown, "NotAllowedError: the operation either timed out or was not allowed"))
        } else {
            Ok(dummy_credential())
        }
    }

    async fn get(&self, _challenge_b64u: &str, _allow_credential_ids: &[String]) -> WalletResult<WebauthnCredential> {
        if self.should_fail.load(Ordering::SeqCst) {
            Err(WalletError::new(ErrorKind::Unknown, "NotAllowedError: the operation either timed out or was not allowed"))
        } else {
            Ok(dummy_credential())
        }
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub users: Mutex<HashMap<(String, u32), UserRecord>>,
    pub authenticators: Mutex<HashMap<String, Vec<AuthenticatorRecord>>>,
    pub current_user: Mutex<Option<String>>,
}

#[async_trait]
impl KeyValueStore for FakeStore {
    async fn put_user_and_authenticator(&self, user: UserRecord, authenticator: AuthenticatorRecord) -> WalletResult<()> {
        let key = (user.account_id.clone(), user.device_number);
        self.authenticators
            .lock()
            .unwrap()
            .entry(user.account_id.clone())
            .or_default()
            .push(authenticator);
        self.users.lock().unwrap().insert(key, user);
        Ok(())
    }

    async fn delete_user_and_authenticators(&self, account_id: &str) -> WalletResult<()> {
        self.users.lock().unwrap().retain(|(acc, _), _| acc != account_id);
        self.authenticators.lock().unwrap().remove(account_id);
        Ok(())
    }

    async fn get_user(&self, account_id: &str, device_number: u32) -> WalletResult<Option<UserRecord>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(&(account_id.to_string(), device_number))
            .cloned())
    }

    async fn get_authenticators(&self, account_id: &str) -> WalletResult<Vec<AuthenticatorRecord>> {
        Ok(self.authenticators.lock().unwrap().get(account_id).cloned().unwrap_or_default())
    }

    async fn set_current_user(&self, account_id: &str) -> WalletResult<()> {
        *self.current_user.lock().unwrap() = Some(account_id.to_string());
        Ok(())
    }

    async fn current_user(&self) -> WalletResult<Option<String>> {
        Ok(self.current_user.lock().unwrap().clone())
    }

    async fn update_last_login(&self, account_id: &str, device_number: u32, at_millis: u64) -> WalletResult<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(&(account_id.to_string(), device_number)) {
            user.last_login = Some(at_millis);
        }
        Ok(())
    }
}
