//! Per-round entry point. The consensus substrate invokes
//! [`MembershipKernel::run_round`] once per agreed round; everything this
//! crate does happens inside that call, strictly sequentially.

use crate::bootstrap::{BootstrapCoordinator, BootstrapOutcome};
use crate::identity::{CredentialId, NodeEndpoint};
use crate::ledger::LedgerGateway;
use crate::persistence::DocumentStore;
use crate::protocol::{
    decode_request, encode_response, MembershipAction, UserRequest, UserResponse,
};
use crate::reconcile::{ReconcileConfig, ReconcileDriver, ReconcileError, ReconcileQueue, StepReport};
use crate::registry::{MembershipRegistry, RegistryError};
use crate::wallet::{ClusterWallet, WalletError, WalletPaths};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use thiserror::Error;

/// One user-submitted input, as handed over by the round driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInput {
    pub submitter: CredentialId,
    pub payload: Vec<u8>,
}

/// The round driver's view of one replicated execution round: round-local
/// inputs plus the mutation hooks for the consensus allow-list and the
/// peer-connection list.
pub trait RoundContext {
    fn round(&self) -> u64;
    fn readonly(&self) -> bool;
    fn inputs(&self) -> Vec<UserInput>;
    fn reply(&mut self, submitter: &CredentialId, payload: Vec<u8>);
    fn update_allow_list(&mut self, identities: &[CredentialId]);
    fn update_peer_list(&mut self, peers: &[String]);
}

/// Encodes and sends one response; an encoding failure is logged and the
/// submitter simply receives nothing.
pub(crate) fn respond(
    ctx: &mut dyn RoundContext,
    submitter: &CredentialId,
    response: &UserResponse,
) {
    match encode_response(response) {
        Ok(payload) => ctx.reply(submitter, payload),
        Err(err) => error!("event=response_encode_failed submitter={submitter} error={err}"),
    }
}

#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Replicated state directory: membership, queue, and public wallet
    /// documents.
    pub data_dir: PathBuf,
    /// Node-local directory for the private wallet document; kept apart
    /// from replicated state with stricter access assumptions.
    pub private_dir: PathBuf,
    /// Operator identity allowed to submit genesis bootstrap inputs.
    pub authorized_operator: CredentialId,
    pub reconcile: ReconcileConfig,
}

impl KernelConfig {
    fn memberships_store(&self) -> DocumentStore {
        DocumentStore::new(self.data_dir.join("memberships.json"))
    }

    fn queue_store(&self) -> DocumentStore {
        DocumentStore::new(self.data_dir.join("reconcile-queue.json"))
    }

    fn wallet_paths(&self) -> WalletPaths {
        WalletPaths {
            public_doc: self.data_dir.join("wallet-public.json"),
            private_doc: self.private_dir.join("wallet-private.json"),
        }
    }
}

/// What one round did, for the embedding node's logs and telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    /// Set while the cluster has no genesis state yet.
    pub bootstrap: Option<BootstrapOutcome>,
    /// Membership requests applied to the registry this round.
    pub requests_applied: usize,
    pub reconcile: Option<StepReport>,
    /// Non-fatal reconciliation failure deferred to the next round.
    pub deferred: Option<String>,
}

pub struct MembershipKernel {
    config: KernelConfig,
    bootstrap: BootstrapCoordinator,
    driver: ReconcileDriver,
}

impl MembershipKernel {
    pub fn new(config: KernelConfig) -> Self {
        let bootstrap = BootstrapCoordinator::new(config.authorized_operator.clone());
        let driver = ReconcileDriver::new(config.reconcile.clone());
        Self {
            config,
            bootstrap,
            driver,
        }
    }

    /// Runs one replicated round. State is reloaded from the persisted
    /// documents every round, so the in-memory view can never run ahead of
    /// what a restarted node would see.
    pub fn run_round(
        &mut self,
        ctx: &mut dyn RoundContext,
        gateway: &mut dyn LedgerGateway,
    ) -> Result<RoundReport, RoundError> {
        let round = ctx.round();
        let (exists, mut registry) = MembershipRegistry::load(self.config.memberships_store())?;
        let mut report = RoundReport {
            round,
            bootstrap: None,
            requests_applied: 0,
            reconcile: None,
            deferred: None,
        };

        if !exists {
            let mut wallet = ClusterWallet::open(self.config.wallet_paths())?;
            let outcome = self
                .bootstrap
                .run_round(ctx, &mut registry, &mut wallet, gateway);
            info!("event=round_complete round={round} phase=bootstrap outcome={outcome:?}");
            report.bootstrap = Some(outcome);
            return Ok(report);
        }

        if ctx.readonly() {
            debug!("event=round_readonly round={round}");
            return Ok(report);
        }

        report.requests_applied = self.apply_membership_requests(ctx, &mut registry)?;

        let mut queue = ReconcileQueue::load(self.config.queue_store())?;
        match self.driver.run_step(&mut registry, &mut queue, gateway, round) {
            Ok(step) => report.reconcile = Some(step),
            Err(ReconcileError::Ledger(err)) => {
                warn!("event=reconcile_deferred round={round} error={err}");
                report.deferred = Some(err.to_string());
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            "event=round_complete round={round} phase=steady requests_applied={} deferred={}",
            report.requests_applied,
            report.deferred.is_some()
        );
        Ok(report)
    }

    fn apply_membership_requests(
        &self,
        ctx: &mut dyn RoundContext,
        registry: &mut MembershipRegistry,
    ) -> Result<usize, RoundError> {
        let mut applied = 0;
        for input in ctx.inputs() {
            let request = match decode_request(&input.payload) {
                Ok(request) => request,
                Err(err) => {
                    debug!(
                        "event=input_skipped submitter={} reason=undecodable error={err}",
                        input.submitter
                    );
                    continue;
                }
            };
            let action = match request {
                UserRequest::MembershipRequest { action } => action,
                other if other.is_bootstrap() => {
                    debug!(
                        "event=input_skipped submitter={} reason=bootstrap_after_genesis",
                        input.submitter
                    );
                    continue;
                }
                _ => continue,
            };

            let response = match action {
                MembershipAction::Enroll {
                    address,
                    peer_port,
                    user_port,
                } => {
                    let endpoint = NodeEndpoint::new(address, peer_port, user_port);
                    if registry.enroll(input.submitter.clone(), endpoint)? {
                        applied += 1;
                        UserResponse::MembershipRequestResult {
                            success: true,
                            error: None,
                        }
                    } else {
                        UserResponse::MembershipRequestResult {
                            success: false,
                            error: Some("already enrolled".into()),
                        }
                    }
                }
                MembershipAction::Revoke => match registry.revoke(&input.submitter) {
                    Ok(()) => {
                        applied += 1;
                        UserResponse::MembershipRequestResult {
                            success: true,
                            error: None,
                        }
                    }
                    Err(
                        err @ (RegistryError::UnknownMember { .. }
                        | RegistryError::NotActive { .. }),
                    ) => UserResponse::MembershipRequestResult {
                        success: false,
                        error: Some(err.to_string()),
                    },
                    Err(err) => return Err(err.into()),
                },
            };
            respond(ctx, &input.submitter, &response);
        }
        Ok(applied)
    }
}

#[derive(Debug, Error)]
pub enum RoundError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}
