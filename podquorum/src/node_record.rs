use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::node_id::generate_id;

/// Role of a member in the consensus group. Only voters count toward quorum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum NodeRole {
    Voter,
    StandBy,
    Spare,
}

impl From<NodeRole> for u8 {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Voter => 0,
            NodeRole::StandBy => 1,
            NodeRole::Spare => 2,
        }
    }
}

impl TryFrom<u8> for NodeRole {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(NodeRole::Voter),
            1 => Ok(NodeRole::StandBy),
            2 => Ok(NodeRole::Spare),
            _ => Err(format!("unknown node role code {}", code)),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            NodeRole::Voter => write!(f, "voter"),
            NodeRole::StandBy => write!(f, "stand-by"),
            NodeRole::Spare => write!(f, "spare"),
        }
    }
}

impl FromStr for NodeRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        match s.as_str() {
            "voter" => Ok(NodeRole::Voter),
            "standby" | "stand-by" => Ok(NodeRole::StandBy),
            "spare" => Ok(NodeRole::Spare),
            _ => Err(()),
        }
    }
}

/// One member of the consensus group, in the layout the engine persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRecord {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Role", default = "default_role")]
    pub role: NodeRole,
}

fn default_role() -> NodeRole {
    NodeRole::Voter
}

impl NodeRecord {
    /// Builds a record whose id is derived from `address`.
    pub fn new<A: Into<String>>(address: A, role: NodeRole) -> Self {
        let address = address.into();
        Self {
            id: generate_id(&address),
            address,
            role,
        }
    }

    pub fn voter<A: Into<String>>(address: A) -> Self {
        Self::new(address, NodeRole::Voter)
    }

    pub fn has_derived_id(&self) -> bool {
        self.id == generate_id(&self.address)
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}, {})", self.id, self.address, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uses_engine_field_names() {
        let record = NodeRecord::voter("10.0.0.2:9001");
        let yaml = serde_yaml::to_string(&record).unwrap();

        assert!(yaml.contains(&format!("ID: {}", record.id)));
        assert!(yaml.contains("Address: 10.0.0.2:9001"));
        assert!(yaml.contains("Role: 0"));
    }

    #[test]
    fn test_unknown_role_code_is_rejected() {
        let yaml = "ID: 1\nAddress: 10.0.0.2:9001\nRole: 7\n";
        assert!(serde_yaml::from_str::<NodeRecord>(yaml).is_err());
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!(NodeRole::from_str("Voter"), Ok(NodeRole::Voter));
        assert_eq!(NodeRole::from_str("standby"), Ok(NodeRole::StandBy));
        assert_eq!(NodeRole::from_str("spare"), Ok(NodeRole::Spare));
        assert!(NodeRole::from_str("leader").is_err());
    }
}
