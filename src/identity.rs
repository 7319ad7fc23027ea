use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque credential identity: the hex-encoded public key that names a
/// cluster member, an operator, or a connected user. Never interpreted,
/// only compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(String);

impl CredentialId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network location of a member node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub address: String,
    pub peer_port: u16,
    pub user_port: u16,
}

impl NodeEndpoint {
    pub fn new(address: impl Into<String>, peer_port: u16, user_port: u16) -> Self {
        Self {
            address: address.into(),
            peer_port,
            user_port,
        }
    }

    /// Peer-connection target string consumed by the peer-list hook.
    pub fn peer_string(&self) -> String {
        format!("{}:{}", self.address, self.peer_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_id_round_trip() {
        let id = CredentialId::new("ed4f2a");
        let encoded = serde_json::to_string(&id).unwrap();
        assert_eq!(encoded, "\"ed4f2a\"");
        let decoded: CredentialId = serde_json::from_str(&encoded).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn peer_string_joins_address_and_peer_port() {
        let endpoint = NodeEndpoint::new("10.0.0.7", 22861, 8081);
        assert_eq!(endpoint.peer_string(), "10.0.0.7:22861");
    }
}
