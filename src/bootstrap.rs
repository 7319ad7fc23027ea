//! One-shot genesis handshake. Seeds the wallet identity and the initial
//! member set from inputs submitted by a single authorized operator,
//! then goes inert for the life of the cluster.

use crate::identity::{CredentialId, NodeEndpoint};
use crate::ledger::LedgerGateway;
use crate::protocol::{decode_request, UserRequest, UserResponse};
use crate::registry::MembershipRegistry;
use crate::round::{respond, RoundContext};
use crate::wallet::ClusterWallet;
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapKind {
    Origin,
    Node,
    Membership,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// No actionable bootstrap input this round.
    Idle,
    /// Readonly round; bootstrap inputs refused without response.
    ReadonlyRefused,
    /// One authorized bootstrap message was processed and answered.
    Processed { kind: BootstrapKind, success: bool },
}

/// Coordinates the three genesis message kinds. The authorized operator
/// identity is injected at construction; unauthorized or undecodable
/// inputs are logged and never answered. At most one message is processed
/// per round; bootstrap is a one-shot, single-message protocol.
#[derive(Debug)]
pub struct BootstrapCoordinator {
    authorized: CredentialId,
}

impl BootstrapCoordinator {
    pub fn new(authorized: CredentialId) -> Self {
        Self { authorized }
    }

    pub fn run_round(
        &self,
        ctx: &mut dyn RoundContext,
        registry: &mut MembershipRegistry,
        wallet: &mut ClusterWallet,
        gateway: &dyn LedgerGateway,
    ) -> BootstrapOutcome {
        if ctx.readonly() {
            warn!("event=bootstrap_refused reason=readonly round={}", ctx.round());
            return BootstrapOutcome::ReadonlyRefused;
        }

        for input in ctx.inputs() {
            let request = match decode_request(&input.payload) {
                Ok(request) => request,
                Err(err) => {
                    debug!(
                        "event=bootstrap_input_skipped submitter={} reason=undecodable error={err}",
                        input.submitter
                    );
                    continue;
                }
            };
            if !request.is_bootstrap() {
                debug!(
                    "event=bootstrap_input_skipped submitter={} reason=not_bootstrap",
                    input.submitter
                );
                continue;
            }
            if input.submitter != self.authorized {
                warn!(
                    "event=bootstrap_unauthorized submitter={}",
                    input.submitter
                );
                continue;
            }

            let outcome = match request {
                UserRequest::OriginBootstrap { ledger_address } => {
                    let (success, signer_address) =
                        self.establish_wallet(wallet, gateway, &ledger_address);
                    respond(
                        ctx,
                        &input.submitter,
                        &UserResponse::OriginBootstrapResult {
                            success,
                            signer_address,
                        },
                    );
                    BootstrapOutcome::Processed {
                        kind: BootstrapKind::Origin,
                        success,
                    }
                }
                UserRequest::NodeBootstrap {
                    ledger_address,
                    origin,
                } => {
                    let (success, signer_address) =
                        self.establish_wallet(wallet, gateway, &ledger_address);
                    if success {
                        ctx.update_allow_list(&[origin.identity.clone()]);
                        ctx.update_peer_list(&[origin.peer_string()]);
                        info!(
                            "event=node_bootstrap origin={} peer={}",
                            origin.identity,
                            origin.peer_string()
                        );
                    }
                    respond(
                        ctx,
                        &input.submitter,
                        &UserResponse::NodeBootstrapResult {
                            success,
                            signer_address,
                        },
                    );
                    BootstrapOutcome::Processed {
                        kind: BootstrapKind::Node,
                        success,
                    }
                }
                UserRequest::MembershipBootstrap { members } => {
                    let initial: Vec<(CredentialId, NodeEndpoint)> = members
                        .iter()
                        .map(|member| (member.identity.clone(), member.endpoint()))
                        .collect();
                    let success = match registry.bootstrap_seed(&initial) {
                        Ok(()) => {
                            ctx.update_allow_list(&registry.identities());
                            ctx.update_peer_list(&registry.peer_strings());
                            true
                        }
                        Err(err) => {
                            warn!("event=membership_bootstrap_failed error={err}");
                            false
                        }
                    };
                    respond(
                        ctx,
                        &input.submitter,
                        &UserResponse::MembershipBootstrapResult { success },
                    );
                    BootstrapOutcome::Processed {
                        kind: BootstrapKind::Membership,
                        success,
                    }
                }
                // Filtered by is_bootstrap above.
                UserRequest::MembershipRequest { .. } => continue,
            };
            return outcome;
        }
        BootstrapOutcome::Idle
    }

    /// Generates and binds the signer credential. Failures become a
    /// `success: false` response rather than a round error.
    fn establish_wallet(
        &self,
        wallet: &mut ClusterWallet,
        gateway: &dyn LedgerGateway,
        ledger_address: &str,
    ) -> (bool, Option<String>) {
        let credential = match gateway.generate_signer_credential(ledger_address) {
            Ok(credential) => credential,
            Err(err) => {
                warn!("event=signer_generation_failed error={err}");
                return (false, None);
            }
        };
        match wallet.establish(ledger_address, credential) {
            Ok(signer_address) => (true, Some(signer_address)),
            Err(err) => {
                warn!("event=wallet_establish_failed error={err}");
                (false, None)
            }
        }
    }
}
