//! Per-round reconciliation step: derive operations from membership
//! deltas, then advance the single in-flight operation by one step.

use crate::identity::CredentialId;
use crate::ledger::{LedgerError, LedgerGateway, TokenRef};
use crate::persistence::DocumentError;
use crate::reconcile::queue::{OpKind, OpStatus, ReconcileOp, ReconcileQueue};
use crate::registry::{MemberState, MembershipRegistry, RegistryError};
use log::{info, warn};
use thiserror::Error;

/// Recovery policy for a submitted transaction whose confirmation never
/// arrives. The ledger offers no failure signal, so without one of these
/// policies a dead transaction occupies the in-flight slot forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Keep blocking and report the stall every round. Default: demoting a
    /// transaction that settles late would double-submit.
    Report,
    /// Demote the operation to `Pending` (discarding its handle) so the
    /// next round resubmits.
    Resubmit,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// A `Started` operation older than this many rounds is stale.
    pub stale_after_rounds: u64,
    pub stale_policy: StalePolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_after_rounds: 32,
            stale_policy: StalePolicy::Report,
        }
    }
}

/// Diagnostic for an operation stuck past the staleness window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledOperation {
    pub identity: CredentialId,
    pub kind: OpKind,
    pub submitted_round: u64,
    pub age_rounds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Queue empty; nothing to do.
    Idle,
    /// A pending operation was submitted to the ledger this round.
    Submitted { identity: CredentialId, kind: OpKind },
    /// The in-flight operation is not confirmed yet; re-check next round.
    AwaitingConfirmation { identity: CredentialId, kind: OpKind },
    /// A stale operation was demoted for resubmission.
    Demoted { identity: CredentialId, kind: OpKind },
    /// Confirmation observed; membership updated and operation retired.
    Confirmed { identity: CredentialId, kind: OpKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Operations newly derived from the member set this round.
    pub derived: usize,
    /// Revoked-without-token members removed directly during derivation.
    pub shortcut_purges: Vec<CredentialId>,
    pub outcome: AdvanceOutcome,
    pub stalled: Option<StalledOperation>,
}

#[derive(Debug)]
pub struct ReconcileDriver {
    config: ReconcileConfig,
}

impl ReconcileDriver {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn run_step(
        &self,
        registry: &mut MembershipRegistry,
        queue: &mut ReconcileQueue,
        gateway: &mut dyn LedgerGateway,
        round: u64,
    ) -> Result<StepReport, ReconcileError> {
        let mut report = StepReport {
            derived: 0,
            shortcut_purges: Vec::new(),
            outcome: AdvanceOutcome::Idle,
            stalled: None,
        };
        self.derive(registry, queue, &mut report)?;
        self.advance(registry, queue, gateway, round, &mut report)?;
        Ok(report)
    }

    /// Scans the member set in its persisted (insertion) order so every
    /// replica appends identical operations to identical queues.
    fn derive(
        &self,
        registry: &mut MembershipRegistry,
        queue: &mut ReconcileQueue,
        report: &mut StepReport,
    ) -> Result<(), ReconcileError> {
        let snapshot = registry.members().to_vec();
        for record in snapshot {
            match record.state {
                MemberState::Pending if record.token.is_none() => {
                    if !queue.contains(&record.identity, OpKind::Mint) {
                        queue.push(ReconcileOp::queued(
                            OpKind::Mint,
                            record.identity.clone(),
                            record.token_uri(),
                        ))?;
                        report.derived += 1;
                    }
                }
                MemberState::Revoked => match &record.token {
                    Some(token) => {
                        if !queue.contains(&record.identity, OpKind::Burn) {
                            queue.push(ReconcileOp::queued(
                                OpKind::Burn,
                                record.identity.clone(),
                                token.as_str().to_string(),
                            ))?;
                            report.derived += 1;
                        }
                    }
                    // Revoked before any mint settled: nothing exists on
                    // the ledger, so the record is removed outright.
                    None => {
                        warn!(
                            "event=revoked_without_token identity={} action=direct_purge",
                            record.identity
                        );
                        registry.purge(&record.identity)?;
                        report.shortcut_purges.push(record.identity);
                    }
                },
                _ => {}
            }
        }
        Ok(())
    }

    fn advance(
        &self,
        registry: &mut MembershipRegistry,
        queue: &mut ReconcileQueue,
        gateway: &mut dyn LedgerGateway,
        round: u64,
        report: &mut StepReport,
    ) -> Result<(), ReconcileError> {
        let Some(index) = queue.started_index().or_else(|| queue.first_pending_index()) else {
            report.outcome = AdvanceOutcome::Idle;
            return Ok(());
        };
        let op = queue.ops()[index].clone();

        match op.status {
            OpStatus::Pending => {
                let prepared = match op.kind {
                    OpKind::Mint => gateway.prepare_mint(&op.payload)?,
                    OpKind::Burn => gateway.prepare_burn(&TokenRef::new(op.payload.clone()))?,
                };
                // A submission failure propagates to the round boundary;
                // the operation stays `Pending` and retries next round.
                let handle = gateway.submit(prepared)?;
                queue.mark_started(index, handle, round)?;
                info!(
                    "event=op_submitted kind={:?} identity={} round={round}",
                    op.kind, op.identity
                );
                report.outcome = AdvanceOutcome::Submitted {
                    identity: op.identity,
                    kind: op.kind,
                };
            }
            OpStatus::Started => {
                let Some(handle) = op.txn.clone() else {
                    warn!(
                        "event=op_missing_handle identity={} action=demote",
                        op.identity
                    );
                    queue.demote(index)?;
                    report.outcome = AdvanceOutcome::Demoted {
                        identity: op.identity,
                        kind: op.kind,
                    };
                    return Ok(());
                };
                if gateway.query_confirmed(&handle)? {
                    self.complete(registry, queue, gateway, index, &op, report)?;
                } else {
                    self.handle_unconfirmed(queue, index, &op, round, report)?;
                }
            }
        }
        Ok(())
    }

    fn complete(
        &self,
        registry: &mut MembershipRegistry,
        queue: &mut ReconcileQueue,
        gateway: &mut dyn LedgerGateway,
        index: usize,
        op: &ReconcileOp,
        report: &mut StepReport,
    ) -> Result<(), ReconcileError> {
        match op.kind {
            OpKind::Mint => {
                let Some(token) = gateway.resolve_token_by_payload(&op.payload)? else {
                    // Confirmed but not yet resolvable; keep the operation
                    // and retry resolution next round.
                    warn!(
                        "event=token_unresolved identity={} payload={}",
                        op.identity, op.payload
                    );
                    report.outcome = AdvanceOutcome::AwaitingConfirmation {
                        identity: op.identity.clone(),
                        kind: op.kind,
                    };
                    return Ok(());
                };
                registry.activate(&op.identity, token)?;
            }
            OpKind::Burn => {
                registry.purge(&op.identity)?;
            }
        }
        queue.remove(index)?;
        info!(
            "event=op_confirmed kind={:?} identity={}",
            op.kind, op.identity
        );
        report.outcome = AdvanceOutcome::Confirmed {
            identity: op.identity.clone(),
            kind: op.kind,
        };
        Ok(())
    }

    fn handle_unconfirmed(
        &self,
        queue: &mut ReconcileQueue,
        index: usize,
        op: &ReconcileOp,
        round: u64,
        report: &mut StepReport,
    ) -> Result<(), ReconcileError> {
        let submitted_round = op.submitted_round.unwrap_or(round);
        let age_rounds = round.saturating_sub(submitted_round);
        if age_rounds > self.config.stale_after_rounds {
            match self.config.stale_policy {
                StalePolicy::Resubmit => {
                    warn!(
                        "event=op_stale_resubmit kind={:?} identity={} age_rounds={age_rounds}",
                        op.kind, op.identity
                    );
                    queue.demote(index)?;
                    report.outcome = AdvanceOutcome::Demoted {
                        identity: op.identity.clone(),
                        kind: op.kind,
                    };
                    return Ok(());
                }
                StalePolicy::Report => {
                    warn!(
                        "event=op_stalled kind={:?} identity={} submitted_round={submitted_round} age_rounds={age_rounds}",
                        op.kind, op.identity
                    );
                    report.stalled = Some(StalledOperation {
                        identity: op.identity.clone(),
                        kind: op.kind,
                        submitted_round,
                        age_rounds,
                    });
                }
            }
        }
        report.outcome = AdvanceOutcome::AwaitingConfirmation {
            identity: op.identity.clone(),
            kind: op.kind,
        };
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("operation queue document unreadable: {0}")]
    CorruptState(#[source] DocumentError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeEndpoint;
    use crate::ledger::{PreparedTxn, SignerCredential, TxnHandle, TxnIntent};
    use crate::persistence::DocumentStore;
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedLedger {
        submissions: Vec<TxnIntent>,
        confirmed: HashSet<String>,
        tokens: HashMap<String, TokenRef>,
        reject_submissions: bool,
    }

    impl LedgerGateway for ScriptedLedger {
        fn generate_signer_credential(
            &self,
            _ledger_address: &str,
        ) -> Result<SignerCredential, LedgerError> {
            Ok(SignerCredential {
                address: "signer".into(),
                secret: "secret".into(),
            })
        }

        fn prepare_mint(&self, uri: &str) -> Result<PreparedTxn, LedgerError> {
            Ok(PreparedTxn::new(TxnIntent::Mint { uri: uri.into() }))
        }

        fn prepare_burn(&self, token: &TokenRef) -> Result<PreparedTxn, LedgerError> {
            Ok(PreparedTxn::new(TxnIntent::Burn {
                token: token.clone(),
            }))
        }

        fn submit(&mut self, txn: PreparedTxn) -> Result<TxnHandle, LedgerError> {
            if self.reject_submissions {
                return Err(LedgerError::SubmissionFailed("validator offline".into()));
            }
            let handle = TxnHandle::new(format!("txn-{}", self.submissions.len()));
            self.submissions.push(txn.intent);
            Ok(handle)
        }

        fn query_confirmed(&self, handle: &TxnHandle) -> Result<bool, LedgerError> {
            Ok(self.confirmed.contains(handle.as_str()))
        }

        fn resolve_token_by_payload(&self, uri: &str) -> Result<Option<TokenRef>, LedgerError> {
            Ok(self.tokens.get(uri).cloned())
        }
    }

    struct Fixture {
        _dir: TempDir,
        registry: MembershipRegistry,
        queue: ReconcileQueue,
        ledger: ScriptedLedger,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let (_, registry) =
            MembershipRegistry::load(DocumentStore::new(dir.path().join("memberships.json")))
                .unwrap();
        let queue =
            ReconcileQueue::load(DocumentStore::new(dir.path().join("queue.json"))).unwrap();
        Fixture {
            _dir: dir,
            registry,
            queue,
            ledger: ScriptedLedger::default(),
        }
    }

    fn enroll(fixture: &mut Fixture, tag: &str) -> CredentialId {
        let id = CredentialId::new(format!("id-{tag}"));
        fixture
            .registry
            .enroll(id.clone(), NodeEndpoint::new(format!("host-{tag}"), 10, 20))
            .unwrap();
        id
    }

    fn driver() -> ReconcileDriver {
        ReconcileDriver::new(ReconcileConfig::default())
    }

    fn run(fixture: &mut Fixture, driver: &ReconcileDriver, round: u64) -> StepReport {
        driver
            .run_step(
                &mut fixture.registry,
                &mut fixture.queue,
                &mut fixture.ledger,
                round,
            )
            .unwrap()
    }

    #[test]
    fn pending_member_derives_one_mint_with_canonical_payload() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        let report = run(&mut fx, &driver(), 1);
        assert_eq!(report.derived, 1);
        let op = &fx.queue.ops()[0];
        assert_eq!(op.kind, OpKind::Mint);
        assert_eq!(op.identity, id);
        assert_eq!(op.payload, "id-a;host-a;10;20");
        // Submission happened in the same round.
        assert_eq!(op.status, OpStatus::Started);
    }

    #[test]
    fn derivation_never_duplicates_operations() {
        let mut fx = fixture();
        enroll(&mut fx, "a");
        let driver = driver();
        run(&mut fx, &driver, 1);
        let report = run(&mut fx, &driver, 2);
        assert_eq!(report.derived, 0);
        assert_eq!(fx.queue.ops().len(), 1);
    }

    #[test]
    fn at_most_one_started_operation() {
        let mut fx = fixture();
        enroll(&mut fx, "a");
        enroll(&mut fx, "b");
        enroll(&mut fx, "c");
        let driver = driver();
        for round in 1..=5 {
            run(&mut fx, &driver, round);
            let started = fx
                .queue
                .ops()
                .iter()
                .filter(|op| op.status == OpStatus::Started)
                .count();
            assert!(started <= 1, "round {round} had {started} in flight");
        }
    }

    #[test]
    fn unconfirmed_submission_leaves_state_unchanged() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        let driver = driver();
        run(&mut fx, &driver, 1);
        let report = run(&mut fx, &driver, 2);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::AwaitingConfirmation {
                identity: id.clone(),
                kind: OpKind::Mint
            }
        );
        assert_eq!(fx.queue.ops().len(), 1);
        assert_eq!(fx.registry.get(&id).unwrap().state, MemberState::Pending);
    }

    #[test]
    fn confirmed_mint_activates_member_and_retires_op() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        let driver = driver();
        run(&mut fx, &driver, 1);
        fx.ledger.confirmed.insert("txn-0".into());
        fx.ledger
            .tokens
            .insert("id-a;host-a;10;20".into(), TokenRef::new("T1"));

        let report = run(&mut fx, &driver, 2);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::Confirmed {
                identity: id.clone(),
                kind: OpKind::Mint
            }
        );
        let record = fx.registry.get(&id).unwrap();
        assert_eq!(record.state, MemberState::Active);
        assert_eq!(record.token, Some(TokenRef::new("T1")));
        assert!(fx.queue.ops().is_empty());
    }

    #[test]
    fn repeated_confirmation_rounds_are_idempotent() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        let driver = driver();
        run(&mut fx, &driver, 1);
        fx.ledger.confirmed.insert("txn-0".into());
        fx.ledger
            .tokens
            .insert("id-a;host-a;10;20".into(), TokenRef::new("T1"));
        run(&mut fx, &driver, 2);
        // Second pass with the ledger still reporting confirmed: no queue
        // entry remains, so nothing double-activates.
        let report = run(&mut fx, &driver, 3);
        assert_eq!(report.outcome, AdvanceOutcome::Idle);
        assert_eq!(fx.registry.get(&id).unwrap().token, Some(TokenRef::new("T1")));
    }

    #[test]
    fn confirmed_burn_purges_member() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        let driver = driver();
        run(&mut fx, &driver, 1);
        fx.ledger.confirmed.insert("txn-0".into());
        fx.ledger
            .tokens
            .insert("id-a;host-a;10;20".into(), TokenRef::new("T1"));
        run(&mut fx, &driver, 2);
        fx.registry.revoke(&id).unwrap();

        run(&mut fx, &driver, 3); // derives + submits the burn
        assert_eq!(
            fx.ledger.submissions.last(),
            Some(&TxnIntent::Burn {
                token: TokenRef::new("T1")
            })
        );
        fx.ledger.confirmed.insert("txn-1".into());
        let report = run(&mut fx, &driver, 4);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::Confirmed {
                identity: id.clone(),
                kind: OpKind::Burn
            }
        );
        assert!(fx.registry.get(&id).is_none());
        assert!(fx.queue.ops().is_empty());
    }

    #[test]
    fn submission_failure_surfaces_and_retries_next_round() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        fx.ledger.reject_submissions = true;
        let driver = driver();
        let err = driver
            .run_step(&mut fx.registry, &mut fx.queue, &mut fx.ledger, 1)
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Ledger(LedgerError::SubmissionFailed(_))
        ));
        assert_eq!(fx.queue.ops()[0].status, OpStatus::Pending);

        fx.ledger.reject_submissions = false;
        let report = run(&mut fx, &driver, 2);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::Submitted {
                identity: id,
                kind: OpKind::Mint
            }
        );
    }

    #[test]
    fn stale_operation_reported_under_default_policy() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        let driver = driver();
        run(&mut fx, &driver, 1);
        let report = run(&mut fx, &driver, 40);
        let stalled = report.stalled.expect("stall diagnostic");
        assert_eq!(stalled.identity, id);
        assert_eq!(stalled.submitted_round, 1);
        assert_eq!(stalled.age_rounds, 39);
        // Still blocking: the operation keeps its handle.
        assert_eq!(fx.queue.ops()[0].status, OpStatus::Started);
    }

    #[test]
    fn stale_operation_demoted_under_resubmit_policy() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        let driver = ReconcileDriver::new(ReconcileConfig {
            stale_after_rounds: 4,
            stale_policy: StalePolicy::Resubmit,
        });
        run(&mut fx, &driver, 1);
        let report = run(&mut fx, &driver, 10);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::Demoted {
                identity: id,
                kind: OpKind::Mint
            }
        );
        let op = &fx.queue.ops()[0];
        assert_eq!(op.status, OpStatus::Pending);
        assert!(op.txn.is_none());
        // Next round resubmits with a fresh handle.
        run(&mut fx, &driver, 11);
        assert_eq!(fx.queue.ops()[0].status, OpStatus::Started);
        assert_eq!(fx.ledger.submissions.len(), 2);
    }

    #[test]
    fn revoked_member_without_token_is_purged_directly() {
        let mut fx = fixture();
        // Construct the never-activated removal case directly in the
        // document: a revoked record with no bound token.
        let id = CredentialId::new("id-x");
        let store = DocumentStore::new(fx._dir.path().join("direct.json"));
        store
            .persist(&vec![crate::registry::MemberRecord {
                identity: id.clone(),
                endpoint: NodeEndpoint::new("host-x", 1, 2),
                state: MemberState::Revoked,
                token: None,
                is_signer: true,
            }])
            .unwrap();
        let (_, mut registry) = MembershipRegistry::load(store).unwrap();

        let driver = driver();
        let report = driver
            .run_step(&mut registry, &mut fx.queue, &mut fx.ledger, 1)
            .unwrap();
        assert_eq!(report.shortcut_purges, vec![id.clone()]);
        assert_eq!(report.derived, 0);
        assert!(registry.get(&id).is_none());
        assert!(fx.queue.ops().is_empty());
    }

    #[test]
    fn unresolvable_token_keeps_operation_in_flight() {
        let mut fx = fixture();
        let id = enroll(&mut fx, "a");
        let driver = driver();
        run(&mut fx, &driver, 1);
        fx.ledger.confirmed.insert("txn-0".into());
        // Confirmed, but the token lookup comes back empty.
        let report = run(&mut fx, &driver, 2);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::AwaitingConfirmation {
                identity: id.clone(),
                kind: OpKind::Mint
            }
        );
        assert_eq!(fx.queue.ops().len(), 1);
        assert_eq!(fx.registry.get(&id).unwrap().state, MemberState::Pending);

        fx.ledger
            .tokens
            .insert("id-a;host-a;10;20".into(), TokenRef::new("T1"));
        let report = run(&mut fx, &driver, 3);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::Confirmed {
                identity: id,
                kind: OpKind::Mint
            }
        );
    }
}
