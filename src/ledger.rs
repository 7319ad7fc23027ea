//! Gateway boundary to the external token ledger. The multi-signature
//! transaction machinery lives behind [`LedgerGateway`]; this module owns
//! only the trait, the data carriers, and the error taxonomy.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Reference to a membership token resident on the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenRef(String);

impl TokenRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a submitted transaction awaiting confirmation. The gateway
/// chooses the encoding; this layer only stores and echoes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnHandle(String);

impl TxnHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a prepared transaction will do once settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnIntent {
    Mint { uri: String },
    Burn { token: TokenRef },
}

/// A transaction the gateway has fully prepared for multi-sign submission.
/// `blob` is gateway-private encoding; callers treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTxn {
    pub intent: TxnIntent,
    pub blob: Vec<u8>,
}

impl PreparedTxn {
    pub fn new(intent: TxnIntent) -> Self {
        Self {
            intent,
            blob: Vec::new(),
        }
    }
}

/// A locally-generated signer key pair bound to the shared ledger account.
/// `secret` never leaves the node; `address` is handed back to the operator
/// for out-of-band registration on the account's signer list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerCredential {
    pub address: String,
    pub secret: String,
}

pub trait LedgerGateway {
    /// Local key generation; no network involved.
    fn generate_signer_credential(
        &self,
        ledger_address: &str,
    ) -> Result<SignerCredential, LedgerError>;

    fn prepare_mint(&self, uri: &str) -> Result<PreparedTxn, LedgerError>;

    fn prepare_burn(&self, token: &TokenRef) -> Result<PreparedTxn, LedgerError>;

    /// Synchronous rejection surfaces as `SubmissionFailed`; acceptance
    /// only means "pending confirmation", never settlement.
    fn submit(&mut self, txn: PreparedTxn) -> Result<TxnHandle, LedgerError>;

    /// The only visibility the ledger offers: confirmed, or not yet. There
    /// is no failure signal for a transaction that will never settle.
    fn query_confirmed(&self, handle: &TxnHandle) -> Result<bool, LedgerError>;

    /// Looks up the token minted for `uri`, once settled.
    fn resolve_token_by_payload(&self, uri: &str) -> Result<Option<TokenRef>, LedgerError>;
}

/// Generates an ed25519 signer credential held in software. Gateway
/// implementations that keep keys on disk delegate here.
pub fn generate_software_credential() -> SignerCredential {
    let key = SigningKey::generate(&mut OsRng);
    let digest = Sha256::digest(key.verifying_key().as_bytes());
    SignerCredential {
        address: hex::encode(&digest[..20]),
        secret: hex::encode(key.to_bytes()),
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger rejected submission: {0}")]
    SubmissionFailed(String),
    #[error("signer credential generation failed: {0}")]
    SignerGeneration(String),
    #[error("transaction preparation failed: {0}")]
    Preparation(String),
    #[error("ledger query failed: {0}")]
    Query(String),
}
