// ============================================================================
// Opened ports
// ============================================================================
//
// Ranges opened by units are stored per (machine, subnet) in one
// `openedPorts` document listing every unit's ranges:
//
// ```text
// m#0#10.0.0.0/24 ─┬─ wordpress/0  80-80/tcp
//                  ├─ wordpress/0  443-443/tcp
//                  └─ mysql/0      3306-3306/tcp
// ```
//
// A unit's own ranges never overlap: opening merges with touching ranges
// of the same protocol and closing splits them. Ranges of different units
// must not overlap at all. A document left with no ranges is removed.
//
// ============================================================================

use super::State;
use crate::core::{Result, StateError, TXN_REVNO_FIELD, to_document, to_value};
use crate::doc;
use crate::model_scope::names::OPENED_PORTS;
use crate::storage::{Filter, Update};
use crate::transaction::Op;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Icmp,
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Icmp => "icmp",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "icmp" => Ok(Protocol::Icmp),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(StateError::InvalidArgument(format!("invalid protocol {s:?}"))),
        }
    }
}

/// Inclusive range of ports. Ordered by protocol, then start, then end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub protocol: Protocol,
    #[serde(rename = "fromport")]
    pub from_port: u16,
    #[serde(rename = "toport")]
    pub to_port: u16,
}

impl PortRange {
    pub fn new(from_port: u16, to_port: u16, protocol: Protocol) -> Result<Self> {
        let range = Self {
            protocol,
            from_port,
            to_port,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn single(port: u16, protocol: Protocol) -> Result<Self> {
        Self::new(port, port, protocol)
    }

    pub fn validate(&self) -> Result<()> {
        if self.from_port == 0 || self.to_port == 0 {
            return Err(StateError::InvalidArgument(format!(
                "port range bounds must be between 1 and 65535, got {}-{}",
                self.from_port, self.to_port
            )));
        }
        if self.from_port > self.to_port {
            return Err(StateError::InvalidArgument(format!(
                "invalid port range {}-{}",
                self.from_port, self.to_port
            )));
        }
        Ok(())
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.protocol == other.protocol
            && self.from_port <= other.to_port
            && other.from_port <= self.to_port
    }

    fn touches(&self, other: &PortRange) -> bool {
        self.protocol == other.protocol
            && u32::from(self.from_port) <= u32::from(other.to_port) + 1
            && u32::from(other.from_port) <= u32::from(self.to_port) + 1
    }
}

impl Ord for PortRange {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.protocol, self.from_port, self.to_port).cmp(&(
            other.protocol,
            other.from_port,
            other.to_port,
        ))
    }
}

impl PartialOrd for PortRange {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}/{}", self.from_port, self.to_port, self.protocol)
    }
}

/// Adds `range` to a unit's ranges, merging with touching ones.
pub(crate) fn merge_range(ranges: &[PortRange], range: PortRange) -> Vec<PortRange> {
    let mut all = ranges.to_vec();
    all.push(range);
    all.sort();
    let mut out: Vec<PortRange> = Vec::with_capacity(all.len());
    for r in all {
        match out.last_mut() {
            Some(last) if last.touches(&r) => last.to_port = last.to_port.max(r.to_port),
            _ => out.push(r),
        }
    }
    out
}

/// Removes `range` from a unit's ranges, splitting where needed.
pub(crate) fn split_range(ranges: &[PortRange], range: PortRange) -> Vec<PortRange> {
    let mut out = Vec::with_capacity(ranges.len() + 1);
    for r in ranges {
        if !r.overlaps(&range) {
            out.push(*r);
            continue;
        }
        if r.from_port < range.from_port {
            out.push(PortRange {
                to_port: range.from_port - 1,
                ..*r
            });
        }
        if r.to_port > range.to_port {
            out.push(PortRange {
                from_port: range.to_port + 1,
                ..*r
            });
        }
    }
    out.sort();
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UnitPortRange {
    #[serde(rename = "unitname")]
    pub unit_name: String,
    #[serde(flatten)]
    pub range: PortRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PortsDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    #[serde(rename = "machineid")]
    pub machine_id: String,
    #[serde(rename = "subnetid", default)]
    pub subnet_id: String,
    #[serde(default)]
    pub ports: Vec<UnitPortRange>,
    #[serde(rename = "txn-revno", default)]
    pub txn_revno: i64,
}

impl PortsDoc {
    pub fn unit_ranges(&self, unit: &str) -> Vec<PortRange> {
        let mut ranges: Vec<PortRange> = self
            .ports
            .iter()
            .filter(|p| p.unit_name == unit)
            .map(|p| p.range)
            .collect();
        ranges.sort();
        ranges
    }
}

pub(crate) fn ports_key(machine_id: &str, subnet_id: &str) -> String {
    format!("m#{machine_id}#{subnet_id}")
}

pub(crate) async fn read_ports_doc(
    st: &State,
    machine_id: &str,
    subnet_id: &str,
) -> Result<Option<PortsDoc>> {
    st.get_entity(OPENED_PORTS, &ports_key(machine_id, subnet_id))
        .await
}

/// Fails if `range` overlaps a range held by a unit other than `unit`.
pub(crate) fn check_conflicts(doc: Option<&PortsDoc>, unit: &str, range: &PortRange) -> Result<()> {
    let Some(doc) = doc else {
        return Ok(());
    };
    match doc
        .ports
        .iter()
        .find(|p| p.unit_name != unit && p.range.overlaps(range))
    {
        Some(held) => Err(StateError::PortConflict(format!(
            "port range {range} conflicts with {} opened by {:?}",
            held.range, held.unit_name
        ))),
        None => Ok(()),
    }
}

/// Ops replacing `unit`'s ranges in the (machine, subnet) document, which
/// must still be at the revision read.
pub(crate) fn replace_unit_ranges_ops(
    existing: Option<&PortsDoc>,
    machine_id: &str,
    subnet_id: &str,
    unit: &str,
    ranges: &[PortRange],
) -> Result<Vec<Op>> {
    let key = ports_key(machine_id, subnet_id);
    let mut ports: Vec<UnitPortRange> = existing
        .map(|doc| {
            doc.ports
                .iter()
                .filter(|p| p.unit_name != unit)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    ports.extend(ranges.iter().map(|range| UnitPortRange {
        unit_name: unit.to_string(),
        range: *range,
    }));
    ports.sort_by(|a, b| a.range.cmp(&b.range).then_with(|| a.unit_name.cmp(&b.unit_name)));

    let op = match existing {
        None if ports.is_empty() => return Ok(Vec::new()),
        None => {
            let doc = PortsDoc {
                doc_id: key.clone(),
                machine_id: machine_id.to_string(),
                subnet_id: subnet_id.to_string(),
                ports,
                txn_revno: 0,
            };
            Op::insert(OPENED_PORTS, key.as_str(), to_document(&doc)?)
        }
        Some(doc) => {
            let unchanged = Filter::eq(TXN_REVNO_FIELD, doc.txn_revno);
            if ports.is_empty() {
                Op::remove(OPENED_PORTS, key.as_str()).matching(unchanged)
            } else {
                Op::update(
                    OPENED_PORTS,
                    key.as_str(),
                    Update::set(doc! { "ports": to_value(&ports)? }),
                )
                .matching(unchanged)
            }
        }
    };
    Ok(vec![op])
}

/// Ops dropping every range `unit` holds on `machine_id`.
pub(crate) async fn remove_unit_ports_ops(
    st: &State,
    machine_id: &str,
    unit: &str,
) -> Result<Vec<Op>> {
    let docs: Vec<PortsDoc> = st
        .find_entities(OPENED_PORTS, Filter::eq("machineid", machine_id))
        .await?;
    let mut ops = Vec::new();
    for doc in docs.iter().filter(|d| d.ports.iter().any(|p| p.unit_name == unit)) {
        ops.extend(replace_unit_ranges_ops(
            Some(doc),
            machine_id,
            &doc.subnet_id,
            unit,
            &[],
        )?);
    }
    Ok(ops)
}

/// Ops removing every ports document of `machine_id`.
pub(crate) async fn remove_machine_ports_ops(st: &State, machine_id: &str) -> Result<Vec<Op>> {
    let docs: Vec<PortsDoc> = st
        .find_entities(OPENED_PORTS, Filter::eq("machineid", machine_id))
        .await?;
    Ok(docs
        .iter()
        .map(|doc| Op::remove(OPENED_PORTS, ports_key(machine_id, &doc.subnet_id).as_str()))
        .collect())
}

/// The ranges opened on one machine for one subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct MachinePorts {
    machine_id: String,
    subnet_id: String,
    ports: Vec<(String, PortRange)>,
}

impl MachinePorts {
    pub(crate) fn from_doc(doc: PortsDoc) -> Self {
        Self {
            machine_id: doc.machine_id,
            subnet_id: doc.subnet_id,
            ports: doc
                .ports
                .into_iter()
                .map(|p| (p.unit_name, p.range))
                .collect(),
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn subnet_id(&self) -> &str {
        &self.subnet_id
    }

    /// Every range with the unit that opened it.
    pub fn all_port_ranges(&self) -> &[(String, PortRange)] {
        &self.ports
    }

    pub fn ports_for_unit(&self, unit: &str) -> Vec<PortRange> {
        let mut ranges: Vec<PortRange> = self
            .ports
            .iter()
            .filter(|(name, _)| name == unit)
            .map(|(_, range)| *range)
            .collect();
        ranges.sort();
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(from: u16, to: u16) -> PortRange {
        PortRange::new(from, to, Protocol::Tcp).unwrap()
    }

    fn udp(from: u16, to: u16) -> PortRange {
        PortRange::new(from, to, Protocol::Udp).unwrap()
    }

    #[test]
    fn test_validate() {
        assert!(PortRange::new(0, 80, Protocol::Tcp).is_err());
        let err = PortRange::new(90, 80, Protocol::Tcp).unwrap_err();
        assert_eq!(err.to_string(), "invalid port range 90-80");
        assert!(PortRange::new(65535, 65535, Protocol::Udp).is_ok());
        assert!("sctp".parse::<Protocol>().is_err());
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
    }

    #[test]
    fn test_merge_joins_touching_ranges() {
        let ranges = vec![tcp(80, 80), tcp(82, 85), udp(81, 81)];
        let merged = merge_range(&ranges, tcp(81, 81));
        assert_eq!(merged, vec![tcp(80, 85), udp(81, 81)]);

        let merged = merge_range(&[tcp(10, 20), tcp(30, 40)], tcp(15, 35));
        assert_eq!(merged, vec![tcp(10, 40)]);
    }

    #[test]
    fn test_split_leaves_the_edges() {
        let split = split_range(&[tcp(80, 90), udp(80, 90)], tcp(85, 86));
        assert_eq!(split, vec![tcp(80, 84), tcp(87, 90), udp(80, 90)]);
        assert_eq!(split_range(&[tcp(80, 80)], tcp(80, 80)), vec![]);
        assert_eq!(split_range(&[tcp(80, 80)], tcp(81, 81)), vec![tcp(80, 80)]);
    }

    #[test]
    fn test_ranges_sort_by_protocol_then_port() {
        let mut ranges = vec![udp(53, 53), tcp(443, 443), tcp(53, 55)];
        ranges.sort();
        assert_eq!(ranges, vec![tcp(53, 55), tcp(443, 443), udp(53, 53)]);
        assert_eq!(tcp(53, 55).to_string(), "53-55/tcp");
    }

    #[test]
    fn test_conflicts_only_with_other_units() {
        let doc = PortsDoc {
            doc_id: "m#0#".into(),
            machine_id: "0".into(),
            subnet_id: String::new(),
            ports: vec![UnitPortRange {
                unit_name: "mysql/0".into(),
                range: tcp(3306, 3306),
            }],
            txn_revno: 1,
        };
        assert!(check_conflicts(Some(&doc), "mysql/0", &tcp(3306, 3306)).is_ok());
        let err = check_conflicts(Some(&doc), "wordpress/0", &tcp(3300, 3310)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "port range 3300-3310/tcp conflicts with 3306-3306/tcp opened by \"mysql/0\""
        );
    }
}
