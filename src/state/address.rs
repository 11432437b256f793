// ============================================================================
// Machine addresses
// ============================================================================
//
// A machine learns addresses from two origins: the provider (cloud API)
// and the machine agent. Provider addresses win. The preferred public and
// private addresses are sticky: once chosen they are kept while still
// present, unless a provider address replaces a machine one or a better
// scoped address of the same origin turns up.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AddressScope {
    #[default]
    Unknown,
    Public,
    CloudLocal,
    MachineLocal,
    LinkLocal,
}

impl AddressScope {
    /// Scope implied by the address value itself.
    pub fn derive(value: &str) -> Self {
        let Ok(ip) = value.parse::<IpAddr>() else {
            return AddressScope::Unknown;
        };
        match ip {
            IpAddr::V4(v4) if v4.is_loopback() => AddressScope::MachineLocal,
            IpAddr::V4(v4) if v4.is_link_local() => AddressScope::LinkLocal,
            IpAddr::V4(v4) if v4.is_private() => AddressScope::CloudLocal,
            IpAddr::V6(v6) if v6.is_loopback() => AddressScope::MachineLocal,
            IpAddr::V6(v6) if v6.segments()[0] & 0xffc0 == 0xfe80 => AddressScope::LinkLocal,
            IpAddr::V6(v6) if v6.segments()[0] & 0xfe00 == 0xfc00 => AddressScope::CloudLocal,
            _ => AddressScope::Public,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressOrigin {
    #[default]
    Unknown,
    Provider,
    Machine,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub value: String,
    pub scope: AddressScope,
}

impl Address {
    /// An address whose scope is derived from its value.
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            scope: AddressScope::derive(value),
        }
    }

    pub fn scoped(value: &str, scope: AddressScope) -> Self {
        Self {
            value: value.to_string(),
            scope,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// A chosen address together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PreferredAddress {
    pub address: Address,
    pub origin: AddressOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Preference {
    Public,
    Private,
}

impl Preference {
    /// The scope that is an exact match.
    fn exact(self) -> AddressScope {
        match self {
            Preference::Public => AddressScope::Public,
            Preference::Private => AddressScope::CloudLocal,
        }
    }

    /// Scopes acceptable when no exact match exists.
    fn fallback(self, scope: AddressScope) -> bool {
        match self {
            Preference::Public => matches!(scope, AddressScope::CloudLocal | AddressScope::Unknown),
            Preference::Private => matches!(scope, AddressScope::Public | AddressScope::Unknown),
        }
    }

    /// First exact match, else the first acceptable fallback.
    pub fn select(self, addresses: &[Address]) -> Option<&Address> {
        addresses
            .iter()
            .find(|a| a.scope == self.exact())
            .or_else(|| addresses.iter().find(|a| self.fallback(a.scope)))
    }

    /// Reconsiders `current` against the latest address lists. Returns
    /// the new preferred address when it should change.
    pub fn reconsider(
        self,
        current: Option<&PreferredAddress>,
        provider: &[Address],
        machine: &[Address],
    ) -> Option<Option<PreferredAddress>> {
        let candidate = match self.select(provider) {
            Some(address) => Some(PreferredAddress {
                address: address.clone(),
                origin: AddressOrigin::Provider,
            }),
            None => self.select(machine).map(|address| PreferredAddress {
                address: address.clone(),
                origin: AddressOrigin::Machine,
            }),
        };
        let Some(current) = current else {
            return candidate.is_some().then_some(candidate);
        };
        if !provider.contains(&current.address) && !machine.contains(&current.address) {
            return (candidate.as_ref() != Some(current)).then_some(candidate);
        }
        let Some(new) = candidate else {
            return None;
        };
        if current.origin != AddressOrigin::Provider && new.origin == AddressOrigin::Provider {
            return Some(Some(new));
        }
        if current.address.scope != self.exact()
            && current.origin == new.origin
            && new.address.scope == self.exact()
        {
            return Some(Some(new));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_scope() {
        assert_eq!(AddressScope::derive("127.0.0.2"), AddressScope::MachineLocal);
        assert_eq!(AddressScope::derive("10.0.0.2"), AddressScope::CloudLocal);
        assert_eq!(AddressScope::derive("192.168.1.1"), AddressScope::CloudLocal);
        assert_eq!(AddressScope::derive("8.8.8.8"), AddressScope::Public);
        assert_eq!(AddressScope::derive("169.254.1.1"), AddressScope::LinkLocal);
        assert_eq!(AddressScope::derive("fc00::1"), AddressScope::CloudLocal);
        assert_eq!(AddressScope::derive("example.com"), AddressScope::Unknown);
    }

    #[test]
    fn test_select_prefers_exact_scope() {
        let addrs = vec![
            Address::new("127.0.0.1"),
            Address::new("10.0.0.1"),
            Address::new("8.8.8.8"),
        ];
        assert_eq!(Preference::Public.select(&addrs).unwrap().value, "8.8.8.8");
        assert_eq!(Preference::Private.select(&addrs).unwrap().value, "10.0.0.1");
        assert!(Preference::Public.select(&[Address::new("127.0.0.1")]).is_none());
    }

    #[test]
    fn test_preferred_address_is_sticky() {
        let first = vec![Address::new("8.8.8.8")];
        let chosen = Preference::Public
            .reconsider(None, &first, &[])
            .flatten()
            .unwrap();
        assert_eq!(chosen.address.value, "8.8.8.8");

        let more = vec![Address::new("8.8.4.4"), Address::new("8.8.8.8")];
        assert_eq!(Preference::Public.reconsider(Some(&chosen), &more, &[]), None);

        let gone = vec![Address::new("8.8.4.4")];
        let replaced = Preference::Public
            .reconsider(Some(&chosen), &gone, &[])
            .flatten()
            .unwrap();
        assert_eq!(replaced.address.value, "8.8.4.4");
    }

    #[test]
    fn test_provider_address_replaces_machine_address() {
        let machine = vec![Address::new("8.8.8.8")];
        let chosen = Preference::Public
            .reconsider(None, &[], &machine)
            .flatten()
            .unwrap();
        assert_eq!(chosen.origin, AddressOrigin::Machine);

        let provider = vec![Address::new("10.0.0.1")];
        let replaced = Preference::Public
            .reconsider(Some(&chosen), &provider, &machine)
            .flatten()
            .unwrap();
        assert_eq!(replaced.origin, AddressOrigin::Provider);
        assert_eq!(replaced.address.value, "10.0.0.1");
    }
}
