//! Entity naming rules.

use crate::core::{Result, StateError};
use lazy_static::lazy_static;
use regex::Regex;

const APPLICATION_SNIPPET: &str = r"(?:[a-z][a-z0-9]*(?:-[a-z0-9]*[a-z][a-z0-9]*)*)";
const NUMBER_SNIPPET: &str = r"(?:0|[1-9][0-9]*)";

lazy_static! {
    static ref APPLICATION_NAME: Regex = Regex::new(&format!("^{APPLICATION_SNIPPET}$")).unwrap();
    static ref UNIT_NAME: Regex =
        Regex::new(&format!("^({APPLICATION_SNIPPET})/{NUMBER_SNIPPET}$")).unwrap();
    static ref MACHINE_ID: Regex =
        Regex::new(&format!("^{NUMBER_SNIPPET}(?:/[a-z]+/{NUMBER_SNIPPET})*$")).unwrap();
}

pub fn is_valid_application(name: &str) -> bool {
    APPLICATION_NAME.is_match(name)
}

pub fn is_valid_unit(name: &str) -> bool {
    UNIT_NAME.is_match(name)
}

pub fn is_valid_machine(id: &str) -> bool {
    MACHINE_ID.is_match(id)
}

/// Application part of a unit name: `"wordpress"` for `"wordpress/0"`.
pub fn unit_application(unit: &str) -> Result<&str> {
    UNIT_NAME
        .captures(unit)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| StateError::InvalidArgument(format!("{unit:?} is not a valid unit name")))
}

/// Parent machine of a container id, `None` for top-level machines.
pub fn parent_machine(id: &str) -> Option<&str> {
    let (rest, _) = id.rsplit_once('/')?;
    let (parent, _) = rest.rsplit_once('/')?;
    Some(parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert!(is_valid_application("wordpress"));
        assert!(is_valid_application("my-app2"));
        assert!(!is_valid_application("2app"));
        assert!(!is_valid_application("app-2"));
        assert!(is_valid_unit("wordpress/0"));
        assert!(!is_valid_unit("wordpress/01"));
        assert!(is_valid_machine("0/lxd/12"));
        assert!(!is_valid_machine("0/lxd"));
    }

    #[test]
    fn test_unit_application() {
        assert_eq!(unit_application("my-app2/3").unwrap(), "my-app2");
        assert!(unit_application("nope").is_err());
    }

    #[test]
    fn test_parent_machine() {
        assert_eq!(parent_machine("0"), None);
        assert_eq!(parent_machine("0/lxd/1"), Some("0"));
        assert_eq!(parent_machine("0/lxd/1/kvm/0"), Some("0/lxd/1"));
    }
}
