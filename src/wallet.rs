//! Shared ledger-account identity for the cluster: the account address in
//! a public document, this node's signer credential in a private document
//! kept under a separate path with stricter access assumptions.

use crate::ledger::SignerCredential;
use crate::persistence::{DocumentError, DocumentStore};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
struct PublicWalletDoc {
    address: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PrivateWalletDoc {
    signer_address: String,
    secret: String,
}

/// The established wallet identity. The secret stays inside this module;
/// gateway implementations receive it only through `signer_secret`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletIdentity {
    pub ledger_address: String,
    pub signer_address: String,
    secret: String,
}

impl WalletIdentity {
    pub fn signer_secret(&self) -> &str {
        &self.secret
    }
}

#[derive(Debug, Clone)]
pub struct WalletPaths {
    pub public_doc: PathBuf,
    pub private_doc: PathBuf,
}

#[derive(Debug)]
pub struct ClusterWallet {
    public_store: DocumentStore,
    private_store: DocumentStore,
    identity: Option<WalletIdentity>,
}

impl ClusterWallet {
    /// Loads both wallet documents. Both present: established. Neither
    /// present: awaiting bootstrap. Exactly one present is half-written
    /// bootstrap state and is treated as not established, with a warning.
    pub fn open(paths: WalletPaths) -> Result<Self, WalletError> {
        let public_store = DocumentStore::new(paths.public_doc);
        let private_store = DocumentStore::new(paths.private_doc);
        let public = load_doc::<PublicWalletDoc>(&public_store)?;
        let private = load_doc::<PrivateWalletDoc>(&private_store)?;
        let identity = match (public, private) {
            (Some(public), Some(private)) => Some(WalletIdentity {
                ledger_address: public.address,
                signer_address: private.signer_address,
                secret: private.secret,
            }),
            (None, None) => None,
            (public, _) => {
                warn!(
                    "event=wallet_half_written present={}",
                    if public.is_some() { "public" } else { "private" }
                );
                None
            }
        };
        Ok(Self {
            public_store,
            private_store,
            identity,
        })
    }

    pub fn is_established(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&WalletIdentity> {
        self.identity.as_ref()
    }

    /// One-time binding of the shared account address and this node's
    /// signer credential. The private document is written first so a crash
    /// between the two writes leaves recoverable half-written state rather
    /// than an address with no key behind it.
    pub fn establish(
        &mut self,
        ledger_address: &str,
        credential: SignerCredential,
    ) -> Result<String, WalletError> {
        if self.identity.is_some() {
            return Err(WalletError::AlreadyEstablished);
        }
        if ledger_address.is_empty() {
            return Err(WalletError::InvalidAddress);
        }
        if credential.secret.is_empty() || credential.address.is_empty() {
            return Err(WalletError::InvalidCredential);
        }

        self.private_store.persist(&PrivateWalletDoc {
            signer_address: credential.address.clone(),
            secret: credential.secret.clone(),
        })?;
        self.public_store.persist(&PublicWalletDoc {
            address: ledger_address.to_string(),
        })?;
        self.identity = Some(WalletIdentity {
            ledger_address: ledger_address.to_string(),
            signer_address: credential.address.clone(),
            secret: credential.secret,
        });
        info!(
            "event=wallet_established ledger_address={ledger_address} signer_address={}",
            credential.address
        );
        Ok(credential.address)
    }

    /// Signer-set rotation seam. Not yet specified; the procedure lives
    /// outside this layer.
    pub fn rotate_signer(&mut self, _credential: SignerCredential) -> Result<(), WalletError> {
        Err(WalletError::RotationUnsupported)
    }
}

fn load_doc<T: serde::de::DeserializeOwned>(
    store: &DocumentStore,
) -> Result<Option<T>, WalletError> {
    match store.load::<T>() {
        Ok(value) => Ok(value),
        Err(err) if err.is_corrupt() => Err(WalletError::CorruptState(err)),
        Err(err) => Err(WalletError::Document(err)),
    }
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet document unreadable: {0}")]
    CorruptState(#[source] DocumentError),
    #[error("wallet identity already established")]
    AlreadyEstablished,
    #[error("ledger account address is empty")]
    InvalidAddress,
    #[error("signer credential is incomplete")]
    InvalidCredential,
    #[error("signer rotation is not supported")]
    RotationUnsupported,
    #[error(transparent)]
    Document(#[from] DocumentError),
}
