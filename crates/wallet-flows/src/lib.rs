//! Registration, login, and device-linking — the concrete ceremonies
//! the wallet host dispatches requests to. `wallet-iframe-core` knows
//! nothing about passkeys, VRF challenges, or NEAR transactions; this
//! crate supplies that behind one [`wallet_iframe_core::host::RequestHandler`]
//! implementation, [`WalletFlows`], built from the external collaborator
//! traits in [`collaborators`].

pub mod account_id;
pub mod collaborators;
pub mod link_device;
pub mod login;
pub mod models;
pub mod qr;
pub mod registration;

#[cfg(test)]
pub(crate) mod test_support;

use account_id::AccountIdPolicy;
use collaborators::{ChainRpcClient, ContractClient, CredentialCeremony, KeyValueStore, RelayerClient, Sleeper, SignerWorkerClient, VrfWorkerClient};
use link_device::{DeviceLinkingSession, LinkDeviceFlow, PollGeneration};
use login::LoginFlow;
use registration::RegistrationFlow;
use std::sync::Arc;
use tokio::sync::Mutex;
use wallet_iframe_core::clock::Clock;
use wallet_iframe_core::envelope::RequestPayload;
use wallet_iframe_core::error::{ErrorKind, WalletError, WalletResult};
use wallet_iframe_core::host::{CancelToken, ProgressSink, RequestHandler};

/// Everything [`WalletFlows`] needs to build its three sub-flows,
/// gathered in one place so constructing the dispatcher reads like
/// `WalletFlows::new(collaborators, policy)` rather than eight loose
/// arguments.
pub struct Collaborators {
    pub contract: Arc<dyn ContractClient>,
    pub chain: Arc<dyn ChainRpcClient>,
    pub relayer: Arc<dyn RelayerClient>,
    pub vrf_worker: Arc<dyn VrfWorkerClient>,
    pub signer_worker: Arc<dyn SignerWorkerClient>,
    pub ceremony: Arc<dyn CredentialCeremony>,
    pub store: Arc<dyn KeyValueStore>,
    pub sleeper: Arc<dyn Sleeper>,
    pub clock: Arc<dyn Clock>,
}

/// Ties registration, login, and device linking together behind one
/// dispatch seam. One active device-linking session is tracked at a
/// time, matching the wallet host's single-flight model — live flow
/// sessions are exclusively owned by the wallet host.
pub struct WalletFlows {
    registration: RegistrationFlow,
    login: LoginFlow,
    link_device: LinkDeviceFlow,
    vrf_worker: Arc<dyn VrfWorkerClient>,
    store: Arc<dyn KeyValueStore>,
    link_session: Mutex<Option<(DeviceLinkingSession, Arc<PollGeneration>)>>,
}

impl WalletFlows {
    pub fn new(collaborators: Collaborators, account_id_policy: AccountIdPolicy, shamir_enabled: bool, rp_id: impl Into<String>) -> Self {
        let rp_id = rp_id.into();
        let registration = RegistrationFlow::new(
            collaborators.contract.clone(),
            collaborators.relayer.clone(),
            collaborators.vrf_worker.clone(),
            collaborators.signer_worker.clone(),
            collaborators.ceremony.clone(),
            collaborators.store.clone(),
            collaborators.clock.clone(),
            account_id_policy,
            shamir_enabled,
            rp_id,
        );
        let login = LoginFlow::new(
            collaborators.contract.clone(),
            collaborators.vrf_worker.clone(),
            collaborators.ceremony.clone(),
            collaborators.store.clone(),
            collaborators.clock.clone(),
        );
        let link_device = LinkDeviceFlow::new(
            collaborators.contract.clone(),
            collaborators.chain.clone(),
            collaborators.vrf_worker.clone(),
            collaborators.signer_worker.clone(),
            collaborators.ceremony.clone(),
            collaborators.store.clone(),
            collaborators.sleeper.clone(),
            collaborators.clock.clone(),
        );
        Self {
            registration,
            login,
            link_device,
            vrf_worker: collaborators.vrf_worker,
            store: collaborators.store,
            link_session: Mutex::new(None),
        }
    }

    async fn get_login_state(&self) -> WalletResult<serde_json::Value> {
        match self.store.current_user().await? {
            Some(account_id) => {
                let active = self.vrf_worker.is_active_for(&account_id).await.unwrap_or(false);
                Ok(serde_json::json!({"active": active, "accountId": account_id}))
            }
            None => Ok(serde_json::json!({"active": false})),
        }
    }

    async fn start_device_linking(&self, account_id: Option<String>, progress: &ProgressSink, cancel: &CancelToken) -> WalletResult<serde_json::Value> {
        let (session, qr_data) = match &account_id {
            Some(id) => self.link_device.start_with_account(id).await?,
            None => self.link_device.start_without_account().await?,
        };
        progress.emit(1, "link-device-credential-collection", Some(qr_data));

        let generation = Arc::new(PollGeneration::default());
        let mut session = session;
        self.link_device.run_polling(&mut session, &generation, cancel, progress).await?;
        let result = self.link_device.register(&mut session, progress, cancel).await?;
        *self.link_session.lock().await = Some((session, generation));
        serde_json::to_value(result).map_err(|e| WalletError::new(ErrorKind::Unknown, e.to_string()))
    }

    async fn stop_device_linking(&self) {
        if let Some((mut session, generation)) = self.link_session.lock().await.take() {
            self.link_device.cancel(&mut session, &generation, &CancelToken::default());
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for WalletFlows {
    async fn handle(
        &self,
        payload: RequestPayload,
        progress: ProgressSink,
        cancel: CancelToken,
    ) -> Result<serde_json::Value, WalletError> {
        match payload {
            RequestPayload::Register { account_id } => {
                let result = self.registration.run(&account_id, &progress, &cancel).await?;
                serde_json::to_value(result).map_err(|e| WalletError::new(ErrorKind::Unknown, e.to_string()))
            }
            RequestPayload::Login { account_id } => {
                let account_id = account_id.ok_or_else(|| {
                    WalletError::new(ErrorKind::AccountUnavailable, "no account id provided and no recent login to resume")
                })?;
                let result = self.login.run(&account_id, &progress, &cancel).await?;
                serde_json::to_value(result).map_err(|e| WalletError::new(ErrorKind::Unknown, e.to_string()))
            }
            RequestPayload::Logout => {
                login::logout(self.vrf_worker.as_ref()).await;
                Ok(serde_json::Value::Null)
            }
            RequestPayload::GetLoginState => self.get_login_state().await,
            RequestPayload::StartDevice2LinkingFlow { account_id } => {
                self.start_device_linking(account_id, &progress, &cancel).await
            }
            RequestPayload::StopDevice2LinkingFlow => {
                self.stop_device_linking().await;
                Ok(serde_json::Value::Null)
            }
            RequestPayload::LinkDeviceWithScannedQrData { qr_data } => {
                let payload = qr::decode(&qr_data)?;
                serde_json::to_value(payload).map_err(|e| WalletError::new(ErrorKind::Unknown, e.to_string()))
            }
            RequestPayload::HasPasskey { account_id } => {
                let authenticators = self.store.get_authenticators(&account_id).await?;
                Ok(serde_json::json!({"hasPasskey": !authenticators.is_empty()}))
            }
            other => Err(WalletError::new(
                ErrorKind::Unknown,
                format!("operation {other:?} is not implemented by this wallet flows build"),
            )),
        }
    }
}
