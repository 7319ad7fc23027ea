#![allow(dead_code)]

use coterie::{
    CredentialId, KernelConfig, LedgerError, LedgerGateway, MembershipKernel, PreparedTxn,
    ReconcileConfig, RoundContext, SignerCredential, TokenRef, TxnHandle, TxnIntent, UserInput,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tempfile::TempDir;

/// Scripted ledger double: submissions are recorded, confirmations and
/// token resolution are driven explicitly by the test.
#[derive(Default)]
pub struct MockLedger {
    pub submissions: Vec<TxnIntent>,
    pub confirmed: HashSet<String>,
    pub tokens: HashMap<String, TokenRef>,
    pub reject_submissions: bool,
}

impl MockLedger {
    pub fn confirm(&mut self, handle: &str) {
        self.confirmed.insert(handle.to_string());
    }

    pub fn bind_token(&mut self, uri: &str, token: &str) {
        self.tokens.insert(uri.to_string(), TokenRef::new(token));
    }

    pub fn last_handle(&self) -> String {
        format!("txn-{}", self.submissions.len() - 1)
    }
}

impl LedgerGateway for MockLedger {
    fn generate_signer_credential(
        &self,
        ledger_address: &str,
    ) -> Result<SignerCredential, LedgerError> {
        Ok(SignerCredential {
            address: format!("signer-for-{ledger_address}"),
            secret: "0f".repeat(32),
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
            return Err(LedgerError::SubmissionFailed("gateway offline".into()));
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

/// In-memory round driver double recording every hook invocation.
pub struct TestRoundCtx {
    pub round: u64,
    pub readonly: bool,
    pub inputs: Vec<UserInput>,
    pub replies: Vec<(CredentialId, Vec<u8>)>,
    pub allow_list: Option<Vec<CredentialId>>,
    pub peer_list: Option<Vec<String>>,
}

impl TestRoundCtx {
    pub fn new(round: u64) -> Self {
        Self {
            round,
            readonly: false,
            inputs: Vec::new(),
            replies: Vec::new(),
            allow_list: None,
            peer_list: None,
        }
    }

    pub fn push_input(&mut self, submitter: &str, message: Value) {
        self.inputs.push(UserInput {
            submitter: CredentialId::new(submitter),
            payload: serde_json::to_vec(&message).unwrap(),
        });
    }

    pub fn replies_to(&self, submitter: &str) -> Vec<Value> {
        let id = CredentialId::new(submitter);
        self.replies
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

impl RoundContext for TestRoundCtx {
    fn round(&self) -> u64 {
        self.round
    }

    fn readonly(&self) -> bool {
        self.readonly
    }

    fn inputs(&self) -> Vec<UserInput> {
        self.inputs.clone()
    }

    fn reply(&mut self, submitter: &CredentialId, payload: Vec<u8>) {
        self.replies.push((submitter.clone(), payload));
    }

    fn update_allow_list(&mut self, identities: &[CredentialId]) {
        self.allow_list = Some(identities.to_vec());
    }

    fn update_peer_list(&mut self, peers: &[String]) {
        self.peer_list = Some(peers.to_vec());
    }
}

pub const OPERATOR: &str = "op-ed25519-key";

pub fn kernel(dir: &TempDir) -> MembershipKernel {
    kernel_with_reconcile(dir, ReconcileConfig::default())
}

pub fn kernel_with_reconcile(dir: &TempDir, reconcile: ReconcileConfig) -> MembershipKernel {
    MembershipKernel::new(KernelConfig {
        data_dir: dir.path().join("state"),
        private_dir: dir.path().join("private"),
        authorized_operator: CredentialId::new(OPERATOR),
        reconcile,
    })
}

pub fn member_json(tag: &str) -> Value {
    serde_json::json!({
        "identity": format!("id-{tag}"),
        "address": format!("host-{tag}"),
        "peer_port": 22861,
        "user_port": 8081,
    })
}

pub fn membership_bootstrap(members: &[&str]) -> Value {
    serde_json::json!({
        "type": "membership_bootstrap",
        "members": members.iter().map(|tag| member_json(tag)).collect::<Vec<_>>(),
    })
}

/// Seeds a two-member cluster and returns the kernel ready for steady
/// rounds.
pub fn bootstrapped_kernel(dir: &TempDir, members: &[&str]) -> MembershipKernel {
    let mut kernel = kernel(dir);
    let mut ctx = TestRoundCtx::new(1);
    ctx.push_input(OPERATOR, membership_bootstrap(members));
    let mut ledger = MockLedger::default();
    let report = kernel.run_round(&mut ctx, &mut ledger).unwrap();
    assert!(report.bootstrap.is_some());
    kernel
}
