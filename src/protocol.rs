//! User-facing message kinds carried over the per-round input channel.
//! JSON, tagged by `type`; every processed request yields exactly one
//! response of the matching `<kind>_result` type.

use crate::identity::{CredentialId, NodeEndpoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Genesis declaration of one member, as submitted by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub identity: CredentialId,
    pub address: String,
    pub peer_port: u16,
    pub user_port: u16,
}

impl MemberDescriptor {
    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint::new(self.address.clone(), self.peer_port, self.user_port)
    }
}

/// The originating node's coordinates, carried by `node_bootstrap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginNode {
    pub identity: CredentialId,
    pub address: String,
    pub peer_port: u16,
}

impl OriginNode {
    pub fn peer_string(&self) -> String {
        format!("{}:{}", self.address, self.peer_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MembershipAction {
    /// Enroll the submitter with the given endpoint.
    Enroll {
        address: String,
        peer_port: u16,
        user_port: u16,
    },
    /// Mark the submitter's own membership for removal.
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserRequest {
    OriginBootstrap {
        ledger_address: String,
    },
    NodeBootstrap {
        ledger_address: String,
        origin: OriginNode,
    },
    MembershipBootstrap {
        members: Vec<MemberDescriptor>,
    },
    MembershipRequest {
        #[serde(flatten)]
        action: MembershipAction,
    },
}

impl UserRequest {
    pub fn is_bootstrap(&self) -> bool {
        matches!(
            self,
            UserRequest::OriginBootstrap { .. }
                | UserRequest::NodeBootstrap { .. }
                | UserRequest::MembershipBootstrap { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserResponse {
    OriginBootstrapResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signer_address: Option<String>,
    },
    NodeBootstrapResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signer_address: Option<String>,
    },
    MembershipBootstrapResult {
        success: bool,
    },
    MembershipRequestResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

pub fn decode_request(payload: &[u8]) -> Result<UserRequest, ProtocolError> {
    serde_json::from_slice(payload).map_err(ProtocolError::Malformed)
}

pub fn encode_response(response: &UserResponse) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(response).map_err(ProtocolError::Encode)
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("response encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}
