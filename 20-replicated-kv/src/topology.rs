use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, ensure};
use clap::ValueEnum;

/// A node's role, chosen once at startup and never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Role {
    Leader,
    Secondary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => f.write_str("leader"),
            Role::Secondary => f.write_str("secondary"),
        }
    }
}

/// Static cluster membership as known by the leader: peer address -> role.
///
/// Built once before the server starts accepting connections. Secondaries
/// carry an empty membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    peers: BTreeMap<String, Role>,
}

impl Membership {
    /// Membership of a leader listening on `leader` with the given secondaries.
    pub fn leader(leader: impl Into<String>, secondaries: &[String]) -> Result<Self> {
        let leader = leader.into();
        let mut peers = BTreeMap::new();
        peers.insert(leader.clone(), Role::Leader);

        for address in secondaries {
            let address = address.trim();
            ensure!(!address.is_empty(), "secondary address cannot be empty");
            ensure!(
                address != leader,
                "leader address {leader} cannot also be listed as a secondary"
            );
            ensure!(
                peers.insert(address.to_string(), Role::Secondary).is_none(),
                "secondary {address} listed more than once"
            );
        }

        Ok(Self { peers })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Addresses of every peer with the secondary role, in sorted order.
    pub fn secondaries(&self) -> impl Iterator<Item = &str> {
        self.peers
            .iter()
            .filter(|(_, role)| **role == Role::Secondary)
            .map(|(address, _)| address.as_str())
    }

    pub fn secondary_count(&self) -> usize {
        self.secondaries().count()
    }

    pub fn role_of(&self, address: &str) -> Option<Role> {
        self.peers.get(address).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn leader_is_excluded_from_secondaries_by_role() {
        let membership =
            Membership::leader("10.0.0.1:8000", &addrs(&["10.0.0.3:8000", "10.0.0.2:8000"]))
                .expect("valid membership");

        assert_eq!(membership.role_of("10.0.0.1:8000"), Some(Role::Leader));
        assert_eq!(
            membership.secondaries().collect::<Vec<_>>(),
            vec!["10.0.0.2:8000", "10.0.0.3:8000"]
        );
        assert_eq!(membership.secondary_count(), 2);
    }

    #[test]
    fn rejects_leader_listed_as_secondary() {
        let result = Membership::leader("10.0.0.1:8000", &addrs(&["10.0.0.1:8000"]));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_duplicates_and_blanks() {
        assert!(Membership::leader("a:1", &addrs(&["b:1", "b:1"])).is_err());
        assert!(Membership::leader("a:1", &addrs(&["  "])).is_err());
    }

    #[test]
    fn empty_membership_has_no_secondaries() {
        assert_eq!(Membership::empty().secondary_count(), 0);
        assert_eq!(Membership::leader("a:1", &[]).expect("valid").secondary_count(), 0);
    }
}
