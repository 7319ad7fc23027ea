//! Durable ordered list of reconciliation operations. Dedup key is
//! (identity, kind); at most one operation is `Started` at any time.

use crate::identity::CredentialId;
use crate::ledger::TxnHandle;
use crate::persistence::DocumentStore;
use crate::reconcile::driver::ReconcileError;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Mint,
    Burn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    /// Queued; no external transaction submitted yet.
    Pending,
    /// Submitted; awaiting ledger confirmation.
    Started,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOp {
    pub kind: OpKind,
    pub identity: CredentialId,
    pub status: OpStatus,
    /// Mint: the token URI. Burn: the token reference being burned.
    pub payload: String,
    #[serde(default)]
    pub txn: Option<TxnHandle>,
    /// Round at which the operation entered `Started`; staleness input.
    #[serde(default)]
    pub submitted_round: Option<u64>,
}

impl ReconcileOp {
    pub fn queued(kind: OpKind, identity: CredentialId, payload: String) -> Self {
        Self {
            kind,
            identity,
            status: OpStatus::Pending,
            payload,
            txn: None,
            submitted_round: None,
        }
    }
}

#[derive(Debug)]
pub struct ReconcileQueue {
    store: DocumentStore,
    ops: Vec<ReconcileOp>,
}

impl ReconcileQueue {
    pub fn load(store: DocumentStore) -> Result<Self, ReconcileError> {
        match store.load::<Vec<ReconcileOp>>() {
            Ok(ops) => Ok(Self {
                store,
                ops: ops.unwrap_or_default(),
            }),
            Err(err) if err.is_corrupt() => Err(ReconcileError::CorruptState(err)),
            Err(err) => Err(ReconcileError::Document(err)),
        }
    }

    pub fn ops(&self) -> &[ReconcileOp] {
        &self.ops
    }

    pub fn contains(&self, identity: &CredentialId, kind: OpKind) -> bool {
        self.ops
            .iter()
            .any(|op| op.kind == kind && &op.identity == identity)
    }

    /// Appends in discovery order and persists.
    pub fn push(&mut self, op: ReconcileOp) -> Result<(), ReconcileError> {
        debug!(
            "event=op_queued kind={:?} identity={} payload={}",
            op.kind, op.identity, op.payload
        );
        self.ops.push(op);
        self.persist()
    }

    pub fn started_index(&self) -> Option<usize> {
        self.ops.iter().position(|op| op.status == OpStatus::Started)
    }

    pub fn first_pending_index(&self) -> Option<usize> {
        self.ops.iter().position(|op| op.status == OpStatus::Pending)
    }

    /// Records a successful submission. The select discipline guarantees no
    /// other operation is in flight when this is called.
    pub fn mark_started(
        &mut self,
        index: usize,
        txn: TxnHandle,
        round: u64,
    ) -> Result<(), ReconcileError> {
        debug_assert!(self.started_index().is_none());
        let op = &mut self.ops[index];
        op.status = OpStatus::Started;
        op.txn = Some(txn);
        op.submitted_round = Some(round);
        self.persist()
    }

    /// Demotes a stale `Started` operation back to `Pending`, discarding the
    /// transaction handle so the next round resubmits.
    pub fn demote(&mut self, index: usize) -> Result<(), ReconcileError> {
        let op = &mut self.ops[index];
        op.status = OpStatus::Pending;
        op.txn = None;
        op.submitted_round = None;
        self.persist()
    }

    /// Removes a completed operation. Called only after the membership
    /// registry reflects the ledger confirmation.
    pub fn remove(&mut self, index: usize) -> Result<ReconcileOp, ReconcileError> {
        let op = self.ops.remove(index);
        self.persist()?;
        Ok(op)
    }

    fn persist(&self) -> Result<(), ReconcileError> {
        self.store.persist(&self.ops).map_err(ReconcileError::from)
    }
}
