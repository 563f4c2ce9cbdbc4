//! Device linking — the hardest flow in the crate. Two cooperating
//! devices exchange an authorization across the chain with no shared
//! server: Device2 generates a QR code, polls the contract until its
//! public key is mapped to an account, then registers itself.

use crate::collaborators::{
    ChainRpcClient, ContractClient, CredentialCeremony, KeyValueStore, NearAction, NearActionKind,
    SignTransactionRequest, SignerWorkerClient, Sleeper, VrfWorkerClient,
};
use crate::login::unlock_vrf_keypair;
use crate::models::{
    AuthenticatorRecord, DeviceLinkingPhase, LinkDeviceResult, QrPayload, UserRecord, QR_PAYLOAD_VERSION,
};
use crate::qr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wallet_iframe_core::bridge::{PortHandle, ResponseEnvelopeOrRequest};
use wallet_iframe_core::clock::Clock;
use wallet_iframe_core::error::{classify_external_error, ErrorKind, WalletError, WalletResult};
use wallet_iframe_core::host::{CancelToken, ProgressSink};

/// A discarding [`PortHandle`] for the internal auto-login progress sink
/// device-linking creates for itself — this unlock is not driven by a
/// parent-originated request, so there is no real port to post through.
#[derive(Debug)]
struct NullPort;

impl PortHandle for NullPort {
    fn post(&self, _envelope: &ResponseEnvelopeOrRequest) -> WalletResult<()> {
        Ok(())
    }
}

const SESSION_LIFETIME_MS: u64 = 15 * 60 * 1_000;
const POLL_INTERVAL_MS: u64 = 3_000;
const REGISTRATION_RETRY_DELAY_MS: u64 = 2_000;
const MAX_REGISTRATION_ATTEMPTS: u32 = 5;

fn is_retryable_registration_error(err: &WalletError) -> bool {
    err.kind.is_retryable()
}

/// A generation counter that invalidates any poll cycle's late callback
/// once a newer cycle has started or the session has ended.
#[derive(Default)]
pub struct PollGeneration(AtomicU64);

impl PollGeneration {
    pub fn guard(&self) -> PollGuard<'_> {
        PollGuard {
            generation: &self.0,
            captured: self.0.load(Ordering::SeqCst),
        }
    }

    pub fn advance(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct PollGuard<'a> {
    generation: &'a AtomicU64,
    captured: u64,
}

impl PollGuard<'_> {
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.captured
    }
}

/// The in-memory state of one device-linking attempt, owned entirely by
/// the wallet host — never shared across the origin boundary.
pub struct DeviceLinkingSession {
    pub account_id: Option<String>,
    pub device_number: Option<u32>,
    pub near_public_key: String,
    pub phase: DeviceLinkingPhase,
    pub created_at: u64,
    pub expires_at: u64,
    temp_private_key: Option<Vec<u8>>,
}

impl DeviceLinkingSession {
    fn has_temp_key(&self) -> bool {
        self.temp_private_key.is_some()
    }

    /// Overwrites the temporary key with zeros before dropping it — the
    /// key must never be recoverable from a stale heap page once the
    /// flow moves past the key-swap step.
    fn wipe_temp_key(&mut self) {
        if let Some(mut bytes) = self.temp_private_key.take() {
            for b in bytes.iter_mut() {
                *b = 0;
            }
        }
    }
}

impl Drop for DeviceLinkingSession {
    fn drop(&mut self) {
        self.wipe_temp_key();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Detected { account_id: String, device_number: u32 },
    Expired,
    Stale,
}

pub struct LinkDeviceFlow {
    contract: Arc<dyn ContractClient>,
    chain: Arc<dyn ChainRpcClient>,
    vrf_worker: Arc<dyn VrfWorkerClient>,
    ceremony: Arc<dyn CredentialCeremony>,
    store: Arc<dyn KeyValueStore>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    signer: Arc<dyn SignerWorkerClient>,
}

impl LinkDeviceFlow {
    pub fn new(
        contract: Arc<dyn ContractClient>,
        chain: Arc<dyn ChainRpcClient>,
        vrf_worker: Arc<dyn VrfWorkerClient>,
        signer: Arc<dyn SignerWorkerClient>,
        ceremony: Arc<dyn CredentialCeremony>,
        store: Arc<dyn KeyValueStore>,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            contract,
            chain,
            vrf_worker,
            ceremony,
            store,
            sleeper,
            clock,
            signer,
        }
    }

    /// Option E: the account is already known. Runs an initial
    /// confirmation ceremony only to obtain a PRF output bound to the
    /// account for the deterministic keypair derived later once the
    /// device number is known; this first credential is discarded and a
    /// fresh one is minted once the slot is assigned.
    pub async fn start_with_account(&self, account_id: &str) -> WalletResult<(DeviceLinkingSession, String)> {
        if !self.contract.account_exists(account_id).await.unwrap_or(false) {
            return Err(WalletError::new(ErrorKind::AccountUnavailable, "account does not exist"));
        }
        let credential = self
            .ceremony
            .create("link-device-challenge", account_id)
            .await
            .map_err(|e| classify_external_error(&e.message))?;
        let derived = self.signer.derive_near_keypair(&credential.prf_output_2_b64u).await?;
        let now = self.clock.wall_millis();
        let session = DeviceLinkingSession {
            account_id: Some(account_id.to_string()),
            device_number: Some(2),
            near_public_key: derived.public_key.clone(),
            phase: DeviceLinkingPhase::QrGenerated,
            created_at: now,
            expires_at: now + SESSION_LIFETIME_MS,
            temp_private_key: None,
        };
        let qr = qr::encode(&QrPayload {
            device2_public_key: derived.public_key,
            account_id: Some(account_id.to_string()),
            timestamp: now,
            version: QR_PAYLOAD_VERSION.into(),
        });
        Ok((session, qr))
    }

    /// Option F: no account yet. A temporary keypair stands in for the
    /// real device key until Device1 maps it to an account on chain.
    pub async fn start_without_account(&self) -> WalletResult<(DeviceLinkingSession, String)> {
        let (temp_public_key, temp_private_key) = self.signer.generate_ephemeral_keypair().await?;
        let now = self.clock.wall_millis();
        let session = DeviceLinkingSession {
            account_id: None,
            device_number: None,
            near_public_key: temp_public_key.clone(),
            phase: DeviceLinkingPhase::QrGenerated,
            created_at: now,
            expires_at: now + SESSION_LIFETIME_MS,
            temp_private_key: Some(temp_private_key),
        };
        let qr = qr::encode(&QrPayload {
            device2_public_key: temp_public_key,
            account_id: None,
            timestamp: now,
            version: QR_PAYLOAD_VERSION.into(),
        });
        Ok((session, qr))
    }

    /// One polling tick. Bails out unconditionally if `guard` is stale,
    /// the phase has advanced past polling, cancellation was requested,
    /// or the session's hard deadline has passed.
    pub async fn poll_once(
        &self,
        session: &mut DeviceLinkingSession,
        guard: &PollGuard<'_>,
        cancel: &CancelToken,
    ) -> WalletResult<PollOutcome> {
        if !guard.is_current() {
            return Ok(PollOutcome::Stale);
        }
        if cancel.is_cancelled() || session.phase != DeviceLinkingPhase::Polling {
            return Ok(PollOutcome::Stale);
        }
        if self.clock.wall_millis() >= session.expires_at {
            session.phase = DeviceLinkingPhase::Error;
            return Ok(PollOutcome::Expired);
        }

        let mapping = self.contract.device_linking_mapping(&session.near_public_key).await?;
        if !guard.is_current() {
            return Ok(PollOutcome::Stale);
        }
        match mapping {
            Some(m) => {
                session.account_id = Some(m.account_id.clone());
                session.device_number = Some(m.next_device_number);
                session.phase = DeviceLinkingPhase::AddkeyDetected;
                Ok(PollOutcome::Detected {
                    account_id: m.account_id,
                    device_number: m.next_device_number,
                })
            }
            None => Ok(PollOutcome::Pending),
        }
    }

    /// Polls at a fixed interval until detection, expiry, cancellation,
    /// or staleness. Single-flight: callers must not run two pollers
    /// against the same session concurrently — `generation` guards
    /// against a previous `run_polling` call's delayed tick firing late.
    pub async fn run_polling(
        &self,
        session: &mut DeviceLinkingSession,
        generation: &PollGeneration,
        cancel: &CancelToken,
        progress: &ProgressSink,
    ) -> WalletResult<()> {
        session.phase = DeviceLinkingPhase::Polling;
        progress.emit(1, "link-device-credential-collection", None);
        let guard = generation.guard();
        loop {
            match self.poll_once(session, &guard, cancel).await? {
                PollOutcome::Detected { .. } => return Ok(()),
                PollOutcome::Expired => {
                    return Err(WalletError::new(ErrorKind::LinkSessionExpired, "device linking session expired"))
                }
                PollOutcome::Stale => {
                    return Err(WalletError::new(ErrorKind::Cancelled, "device linking polling cancelled"))
                }
                PollOutcome::Pending => {
                    // Progress here also refreshes the caller's pending
                    // request deadline, which is how a poll cycle can
                    // legitimately outlive the default request timeout.
                    progress.emit(1, "link-device-credential-collection", None);
                    self.sleeper.sleep(POLL_INTERVAL_MS).await;
                }
            }
        }
    }

    /// Registers Device2 once its public key has been mapped, retrying
    /// transient failures up to a fixed bound, then persists and
    /// attempts auto-login.
    pub async fn register(
        &self,
        session: &mut DeviceLinkingSession,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> WalletResult<LinkDeviceResult> {
        session.phase = DeviceLinkingPhase::Registration;
        let account_id = session
            .account_id
            .clone()
            .ok_or_else(|| WalletError::new(ErrorKind::AccountUnavailable, "no account mapped yet"))?;
        let device_number = session
            .device_number
            .ok_or_else(|| WalletError::new(ErrorKind::AccountUnavailable, "no device number assigned yet"))?;

        // Captured once, before any attempt runs, so a later attempt
        // keeps routing into `register_option_f` even after its first
        // successful run wipes the temporary key. `register_option_f`
        // itself checks `has_temp_key()` and skips a repeated swap once
        // it sees the key is already gone, so a retry that only needed
        // the registration broadcast to land doesn't re-attempt a swap
        // with a key that no longer exists.
        let is_option_f = session.has_temp_key();
        let mut attempt = 0;
        loop {
            attempt += 1;
            progress.emit(2, "contract-verification", None);
            let outcome = if is_option_f {
                self.register_option_f(session, &account_id, device_number).await
            } else {
                self.register_option_e(session, &account_id, device_number).await
            };
            match outcome {
                Ok(result) => {
                    session.phase = DeviceLinkingPhase::LinkingComplete;
                    progress.emit(3, "device-linking-complete", None);
                    return Ok(result);
                }
                Err(err) if attempt < MAX_REGISTRATION_ATTEMPTS && is_retryable_registration_error(&err) => {
                    if cancel.is_cancelled() {
                        session.phase = DeviceLinkingPhase::Error;
                        return Err(WalletError::new(ErrorKind::Cancelled, "device linking cancelled"));
                    }
                    self.sleeper.sleep(REGISTRATION_RETRY_DELAY_MS).await;
                    continue;
                }
                Err(err) => {
                    session.phase = DeviceLinkingPhase::Error;
                    return Err(if is_retryable_registration_error(&err) {
                        WalletError::new(ErrorKind::LinkRetryExhausted, err.message)
                    } else {
                        err
                    });
                }
            }
        }
    }

    /// Simpler path: the account was known from the start, so the
    /// existing NEAR key registers directly once the device number is
    /// assigned — re-running the confirmation ceremony so the credential
    /// is bound to the correct device slot.
    async fn register_option_e(
        &self,
        session: &DeviceLinkingSession,
        account_id: &str,
        device_number: u32,
    ) -> WalletResult<LinkDeviceResult> {
        let credential = self
            .ceremony
            .create("link-device-registration-challenge", account_id)
            .await
            .map_err(|e| classify_external_error(&e.message))?;
        let vrf_public_key = self.vrf_worker.derive_and_hold_keypair(&credential.prf_output_1_b64u).await?;
        let nonce = self.chain.access_key_nonce(account_id, &session.near_public_key).await?;
        let block_hash = self.chain.latest_block_hash_b64u().await?;
        let tx = self
            .signer
            .sign_transaction(SignTransactionRequest {
                signer_account_id: account_id.to_string(),
                signer_public_key: session.near_public_key.clone(),
                nonce,
                receiver_id: account_id.to_string(),
                block_hash_b64u: block_hash,
                actions: vec![NearAction {
                    kind: NearActionKind::FunctionCall {
                        method_name: "register_user".into(),
                        args: serde_json::json!({"device_number": device_number, "vrf_public_key": vrf_public_key}),
                    },
                }],
            })
            .await?;
        let transaction_id = self.chain.broadcast_signed_transaction(&tx).await?;
        self.persist_and_login(account_id, device_number, &credential, &vrf_public_key, &session.near_public_key)
            .await?;
        tracing::info!(account_id, device_number, transaction_id, "device linked (option E)");
        Ok(LinkDeviceResult {
            account_id: account_id.to_string(),
            device_number,
        })
    }

    /// The three-step key-swap protocol: derive the real deterministic
    /// keypair, swap it in for the temporary access key, then register
    /// using the new key's own nonce. Resumable: if a previous attempt
    /// already wiped the temporary key, `session.near_public_key` is
    /// already the swapped-in key and only the registration broadcast
    /// below needs to run again.
    async fn register_option_f(
        &self,
        session: &mut DeviceLinkingSession,
        account_id: &str,
        device_number: u32,
    ) -> WalletResult<LinkDeviceResult> {
        let credential = self
            .ceremony
            .create("link-device-registration-challenge", account_id)
            .await
            .map_err(|e| classify_external_error(&e.message))?;

        let registered_public_key = if session.has_temp_key() {
            // Step 1: derive, no broadcast.
            let derived = self.signer.derive_near_keypair(&credential.prf_output_2_b64u).await?;

            // Step 2: key-swap transaction signed with the temporary key.
            let temp_private_key = session
                .temp_private_key
                .clone()
                .expect("has_temp_key() just confirmed this is Some");
            let swap_nonce = self.chain.access_key_nonce(account_id, &session.near_public_key).await?;
            let swap_block_hash = self.chain.latest_block_hash_b64u().await?;
            let swap_tx = self
                .signer
                .sign_with_raw_private_key(
                    &temp_private_key,
                    SignTransactionRequest {
                        signer_account_id: account_id.to_string(),
                        signer_public_key: session.near_public_key.clone(),
                        nonce: swap_nonce,
                        receiver_id: account_id.to_string(),
                        block_hash_b64u: swap_block_hash,
                        actions: vec![
                            NearAction {
                                kind: NearActionKind::AddKey {
                                    public_key: derived.public_key.clone(),
                                },
                            },
                            NearAction {
                                kind: NearActionKind::DeleteKey {
                                    public_key: session.near_public_key.clone(),
                                },
                            },
                        ],
                    },
                )
                .await?;
            self.chain.broadcast_signed_transaction(&swap_tx).await?;
            session.wipe_temp_key();
            session.near_public_key = derived.public_key;
            session.near_public_key.clone()
        } else {
            session.near_public_key.clone()
        };

        // Step 3: register using the new key's own nonce and a fresh hash.
        let vrf_public_key = self.vrf_worker.derive_and_hold_keypair(&credential.prf_output_1_b64u).await?;
        let reg_nonce = self.chain.access_key_nonce(account_id, &registered_public_key).await?;
        let reg_block_hash = self.chain.latest_block_hash_b64u().await?;
        let reg_tx = self
            .signer
            .sign_transaction(SignTransactionRequest {
                signer_account_id: account_id.to_string(),
                signer_public_key: registered_public_key.clone(),
                nonce: reg_nonce,
                receiver_id: account_id.to_string(),
                block_hash_b64u: reg_block_hash,
                actions: vec![NearAction {
                    kind: NearActionKind::FunctionCall {
                        method_name: "register_user".into(),
                        args: serde_json::json!({"device_number": device_number, "vrf_public_key": vrf_public_key}),
                    },
                }],
            })
            .await?;
        self.chain.broadcast_signed_transaction(&reg_tx).await?;

        self.persist_and_login(account_id, device_number, &credential, &vrf_public_key, &registered_public_key)
            .await?;
        Ok(LinkDeviceResult {
            account_id: account_id.to_string(),
            device_number,
        })
    }

    async fn persist_and_login(
        &self,
        account_id: &str,
        device_number: u32,
        credential: &crate::models::WebauthnCredential,
        vrf_public_key: &str,
        near_public_key: &str,
    ) -> WalletResult<()> {
        let now = self.clock.wall_millis();
        let encrypted_vrf_keypair = self.vrf_worker.export_encrypted_keypair().await?;
        let user = UserRecord {
            account_id: account_id.to_string(),
            device_number,
            client_near_public_key: near_public_key.to_string(),
            passkey_credential_id: credential.credential_id.clone(),
            encrypted_vrf_keypair: encrypted_vrf_keypair.clone(),
            server_encrypted_vrf_keypair: None,
            last_updated: now,
            last_login: Some(now),
        };
        let authenticator = AuthenticatorRecord {
            account_id: account_id.to_string(),
            device_number,
            credential_id: credential.credential_id.clone(),
            credential_public_key: credential.credential_public_key.clone(),
            transports: credential.transports.clone(),
            vrf_public_key: vrf_public_key.to_string(),
            registered_at: now,
            synced_at: now,
        };
        self.store.put_user_and_authenticator(user, authenticator).await?;

        // Auto-login: Shamir first, WebAuthn-PRF fallback — same helper
        // the login flow uses, so the two never drift.
        let throwaway_progress = ProgressSink::new(format!("link-device-auto-login-{account_id}"), Arc::new(NullPort));
        let _ = unlock_vrf_keypair(
            account_id,
            self.vrf_worker.as_ref(),
            self.ceremony.as_ref(),
            self.store.as_ref(),
            &throwaway_progress,
        )
        .await;
        self.store.set_current_user(account_id).await?;
        Ok(())
    }

    /// `cancel()`: advances the poll generation so any in-flight tick is
    /// dropped unconditionally, and wipes the temporary key immediately
    /// rather than waiting for the session to be dropped.
    pub fn cancel(&self, session: &mut DeviceLinkingSession, generation: &PollGeneration, cancel: &CancelToken) {
        generation.advance();
        session.wipe_temp_key();
        session.phase = DeviceLinkingPhase::Error;
        let _ = cancel;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::DeviceLinkingMapping;
    use crate::test_support::*;
    use std::sync::atomic::Ordering;

    fn flow(contract: FakeContract) -> (LinkDeviceFlow, Arc<FakeVrfWorker>) {
        let vrf = Arc::new(FakeVrfWorker::default());
        let f = LinkDeviceFlow::new(
            Arc::new(contract),
            Arc::new(FakeChainRpc::default()),
            vrf.clone(),
            Arc::new(FakeSignerWorker::default()),
            Arc::new(FakeCeremony::default()),
            Arc::new(FakeStore::default()),
            Arc::new(FakeSleeper::default()),
            Arc::new(wallet_iframe_core::clock::FakeClock::new(1_000)),
        );
        (f, vrf)
    }

    #[tokio::test]
    async fn option_f_generates_a_qr_with_no_account_id() {
        let (f, _vrf) = flow(FakeContract::default());
        let (session, qr_data) = f.start_without_account().await.unwrap();
        assert!(session.account_id.is_none());
        assert!(session.has_temp_key());
        let decoded = qr::decode(&qr_data).unwrap();
        assert!(decoded.account_id.is_none());
    }

    #[tokio::test]
    async fn option_e_generates_a_qr_with_the_known_account_id() {
        let mut contract = FakeContract::default();
        contract.exists.store(true, Ordering::SeqCst);
        let (f, _vrf) = flow(contract);
        let (session, qr_data) = f.start_with_account("alice.testnet").await.unwrap();
        assert_eq!(session.account_id.as_deref(), Some("alice.testnet"));
        let decoded = qr::decode(&qr_data).unwrap();
        assert_eq!(decoded.account_id.as_deref(), Some("alice.testnet"));
    }

    #[tokio::test]
    async fn polling_detects_a_mapping_and_assigns_the_next_device_number() {
        let mut contract = FakeContract::default();
        *contract.mapping.lock().unwrap() = Some(DeviceLinkingMapping {
            account_id: "alice.testnet".into(),
            next_device_number: 2,
        });
        let (f, _vrf) = flow(contract);
        let (mut session, _qr) = f.start_without_account().await.unwrap();
        session.phase = DeviceLinkingPhase::Polling;
        let generation = PollGeneration::default();
        let cancel = CancelToken::default();
        let guard = generation.guard();
        let outcome = f.poll_once(&mut session, &guard, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Detected {
                account_id: "alice.testnet".into(),
                device_number: 2
            }
        );
        assert_eq!(session.phase, DeviceLinkingPhase::AddkeyDetected);
    }

    #[tokio::test]
    async fn a_stale_generation_short_circuits_the_poll() {
        let (f, _vrf) = flow(FakeContract::default());
        let (mut session, _qr) = f.start_without_account().await.unwrap();
        session.phase = DeviceLinkingPhase::Polling;
        let generation = PollGeneration::default();
        let guard = generation.guard();
        generation.advance();
        let cancel = CancelToken::default();
        let outcome = f.poll_once(&mut session, &guard, &cancel).await.unwrap();
        assert_eq!(outcome, PollOutcome::Stale);
    }

    #[tokio::test]
    async fn expired_session_reports_expired_and_flips_to_error_phase() {
        let (f, _vrf) = flow(FakeContract::default());
        let (mut session, _qr) = f.start_without_account().await.unwrap();
        session.phase = DeviceLinkingPhase::Polling;
        session.expires_at = 0;
        let generation = PollGeneration::default();
        let guard = generation.guard();
        let cancel = CancelToken::default();
        let outcome = f.poll_once(&mut session, &guard, &cancel).await.unwrap();
        assert_eq!(outcome, PollOutcome::Expired);
        assert_eq!(session.phase, DeviceLinkingPhase::Error);
    }

    #[tokio::test]
    async fn option_f_registration_wipes_the_temporary_key_after_the_swap() {
        let mut contract = FakeContract::default();
        *contract.mapping.lock().unwrap() = Some(DeviceLinkingMapping {
            account_id: "alice.testnet".into(),
            next_device_number: 2,
        });
        let (f, _vrf) = flow(contract);
        let (mut session, _qr) = f.start_without_account().await.unwrap();
        session.account_id = Some("alice.testnet".into());
        session.device_number = Some(2);
        let progress = test_progress_sink();
        let cancel = CancelToken::default();
        let result = f.register(&mut session, &progress, &cancel).await.unwrap();
        assert_eq!(result.device_number, 2);
        assert!(!session.has_temp_key());
    }

    #[tokio::test]
    async fn cancel_advances_the_generation_and_wipes_the_temp_key() {
        let (f, _vrf) = flow(FakeContract::default());
        let (mut session, _qr) = f.start_without_account().await.unwrap();
        let generation = PollGeneration::default();
        let cancel = CancelToken::default();
        f.cancel(&mut session, &generation, &cancel);
        assert!(!session.has_temp_key());
        assert_eq!(session.phase, DeviceLinkingPhase::Error);
    }
}
