//! Durable membership registry: identity → lifecycle state, persisted as a
//! single JSON document. Mutations persist before returning; iteration
//! order is insertion order so every replica derives identical
//! reconciliation work from identical documents.

use crate::identity::{CredentialId, NodeEndpoint};
use crate::ledger::TokenRef;
use crate::persistence::{DocumentError, DocumentStore};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    /// Enrolled or declared at genesis; no token bound yet.
    Pending,
    /// Mint confirmed on the ledger; token bound.
    Active,
    /// Marked for removal; token still bound until the burn settles.
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub identity: CredentialId,
    pub endpoint: NodeEndpoint,
    pub state: MemberState,
    #[serde(default)]
    pub token: Option<TokenRef>,
    pub is_signer: bool,
}

impl MemberRecord {
    /// Canonical URI carried by the member's minted token.
    pub fn token_uri(&self) -> String {
        format!(
            "{};{};{};{}",
            self.identity, self.endpoint.address, self.endpoint.peer_port, self.endpoint.user_port
        )
    }
}

#[derive(Debug)]
pub struct MembershipRegistry {
    store: DocumentStore,
    members: Vec<MemberRecord>,
}

impl MembershipRegistry {
    /// Loads the persisted member set. `exists = false` (with an empty set)
    /// means no document has ever been written, the signal that genesis
    /// bootstrap has not occurred.
    pub fn load(store: DocumentStore) -> Result<(bool, Self), RegistryError> {
        match store.load::<Vec<MemberRecord>>() {
            Ok(Some(members)) => Ok((true, Self { store, members })),
            Ok(None) => Ok((
                false,
                Self {
                    store,
                    members: Vec::new(),
                },
            )),
            Err(err) if err.is_corrupt() => Err(RegistryError::CorruptState(err)),
            Err(err) => Err(RegistryError::Document(err)),
        }
    }

    /// Replaces the entire member set with `Pending` genesis entries. An
    /// atomic replace, not a merge; all seeded members carry the signer
    /// flag.
    pub fn bootstrap_seed(
        &mut self,
        initial: &[(CredentialId, NodeEndpoint)],
    ) -> Result<(), RegistryError> {
        if initial.is_empty() {
            return Err(RegistryError::InvalidBootstrapInput(
                "genesis member list is empty",
            ));
        }
        for (index, (identity, _)) in initial.iter().enumerate() {
            if initial[..index].iter().any(|(seen, _)| seen == identity) {
                return Err(RegistryError::InvalidBootstrapInput(
                    "genesis member list contains duplicate identities",
                ));
            }
        }

        self.members = initial
            .iter()
            .map(|(identity, endpoint)| MemberRecord {
                identity: identity.clone(),
                endpoint: endpoint.clone(),
                state: MemberState::Pending,
                token: None,
                is_signer: true,
            })
            .collect();
        self.persist()?;
        info!("event=membership_seeded members={}", self.members.len());
        Ok(())
    }

    /// Inserts a new `Pending` member. Re-enrolling an existing identity is
    /// a logged no-op; enrollment never overwrites. Returns whether a
    /// record was inserted.
    pub fn enroll(
        &mut self,
        identity: CredentialId,
        endpoint: NodeEndpoint,
    ) -> Result<bool, RegistryError> {
        if self.get(&identity).is_some() {
            warn!("event=enroll_rejected identity={identity} reason=already_present");
            return Ok(false);
        }
        self.members.push(MemberRecord {
            identity: identity.clone(),
            endpoint,
            state: MemberState::Pending,
            token: None,
            is_signer: true,
        });
        self.persist()?;
        info!("event=member_enrolled identity={identity}");
        Ok(true)
    }

    /// Binds the minted token and moves the member to `Active`. Absent
    /// identities and repeat confirmations are logged no-ops.
    pub fn activate(
        &mut self,
        identity: &CredentialId,
        token: TokenRef,
    ) -> Result<(), RegistryError> {
        let Some(record) = self.members.iter_mut().find(|m| &m.identity == identity) else {
            warn!("event=activate_skipped identity={identity} reason=absent");
            return Ok(());
        };
        if record.state == MemberState::Active {
            if record.token.as_ref() != Some(&token) {
                warn!(
                    "event=activate_skipped identity={identity} reason=token_already_bound token={token}"
                );
            }
            return Ok(());
        }
        record.state = MemberState::Active;
        record.token = Some(token.clone());
        self.persist()?;
        info!("event=member_activated identity={identity} token={token}");
        Ok(())
    }

    /// Marks an `Active` member for removal. The token stays bound until
    /// the burn settles and `purge` runs.
    pub fn revoke(&mut self, identity: &CredentialId) -> Result<(), RegistryError> {
        let Some(record) = self.members.iter_mut().find(|m| &m.identity == identity) else {
            return Err(RegistryError::UnknownMember {
                identity: identity.clone(),
            });
        };
        if record.state != MemberState::Active {
            return Err(RegistryError::NotActive {
                identity: identity.clone(),
                state: record.state,
            });
        }
        record.state = MemberState::Revoked;
        self.persist()?;
        info!("event=member_revoked identity={identity}");
        Ok(())
    }

    /// Removes the record entirely. Safe on an absent identity.
    pub fn purge(&mut self, identity: &CredentialId) -> Result<(), RegistryError> {
        let before = self.members.len();
        self.members.retain(|m| &m.identity != identity);
        if self.members.len() == before {
            return Ok(());
        }
        self.persist()?;
        info!("event=member_purged identity={identity}");
        Ok(())
    }

    pub fn members(&self) -> &[MemberRecord] {
        &self.members
    }

    pub fn get(&self, identity: &CredentialId) -> Option<&MemberRecord> {
        self.members.iter().find(|m| &m.identity == identity)
    }

    pub fn identities(&self) -> Vec<CredentialId> {
        self.members.iter().map(|m| m.identity.clone()).collect()
    }

    pub fn peer_strings(&self) -> Vec<String> {
        self.members.iter().map(|m| m.endpoint.peer_string()).collect()
    }

    fn persist(&self) -> Result<(), RegistryError> {
        self.store.persist(&self.members)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("membership document unreadable: {0}")]
    CorruptState(#[source] DocumentError),
    #[error("invalid bootstrap input: {0}")]
    InvalidBootstrapInput(&'static str),
    #[error("unknown member {identity}")]
    UnknownMember { identity: CredentialId },
    #[error("cannot revoke {identity}: member is {state:?}, not active")]
    NotActive {
        identity: CredentialId,
        state: MemberState,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
}
