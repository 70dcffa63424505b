//! Rule flattening.
//!
//! Turns one raw rule of one security group, seen from one resource in one
//! direction, into report rows: one row per target, with protocol and port
//! range normalized to report labels.

use crate::error::FlattenError;
use crate::model::{Direction, GroupContext, NormalizedRow, RawRule, ResourceContext, TargetSpec};

/// Provider sentinel for "all protocols" and "all ports".
const ALL: &str = "-1";
const ALL_PORTS: i64 = -1;

/// Target used when a rule names no peer at all.
pub const DEFAULT_TARGET: &str = "0.0.0.0/0";

pub fn normalize_protocol(protocol: &str) -> String {
    if protocol == ALL {
        "any".to_string()
    } else {
        protocol.to_string()
    }
}

/// Port label for a rule.
///
/// A `from_port` without a `to_port` is read as a single port.
pub fn normalize_ports(from_port: Option<i64>, to_port: Option<i64>) -> Result<String, FlattenError> {
    match (from_port, to_port) {
        (None, None) => Ok("N/A".to_string()),
        (None, Some(_)) => Err(FlattenError::invalid("FromPort", "is missing while ToPort is set")),
        (Some(ALL_PORTS), _) => Ok("any".to_string()),
        (Some(from), None) => Ok(from.to_string()),
        (Some(from), Some(to)) if from == to => Ok(from.to_string()),
        (Some(from), Some(to)) => Ok(format!("{} - {}", from, to)),
    }
}

/// Target labels in kind order: IPv4, IPv6, peer groups, prefix lists.
fn target_labels(targets: &[TargetSpec]) -> Result<Vec<&str>, FlattenError> {
    let mut ordered: Vec<&TargetSpec> = targets.iter().collect();
    // Stable, so input order survives within a kind.
    ordered.sort_by_key(|t| t.rank());

    let mut labels = Vec::with_capacity(ordered.len().max(1));
    for target in ordered {
        if target.label().trim().is_empty() {
            return Err(FlattenError::invalid("target", format!("{:?} has an empty label", target)));
        }
        labels.push(target.label());
    }

    if labels.is_empty() {
        labels.push(DEFAULT_TARGET);
    }
    Ok(labels)
}

/// Flattens a rule into report rows.
///
/// Never returns an empty vector: a rule without targets yields a single
/// row against [`DEFAULT_TARGET`]. Either every row of the rule is produced
/// or none is.
pub fn flatten(
    rule: &RawRule,
    direction: Direction,
    resource: &ResourceContext,
    group: &GroupContext,
) -> Result<Vec<NormalizedRow>, FlattenError> {
    let protocol = rule
        .protocol
        .as_deref()
        .ok_or_else(|| FlattenError::missing("IpProtocol"))?;
    if protocol.trim().is_empty() {
        return Err(FlattenError::invalid("IpProtocol", "is empty"));
    }

    let protocol = normalize_protocol(protocol);
    let ports = normalize_ports(rule.from_port, rule.to_port)?;
    let labels = target_labels(&rule.targets)?;

    let rows = labels
        .into_iter()
        .map(|label| {
            let (source, destination) = match direction {
                Direction::Inbound => (label.to_string(), resource.id.clone()),
                Direction::Outbound => (resource.id.clone(), label.to_string()),
            };
            NormalizedRow {
                resource_type: resource.kind,
                region: resource.region.clone(),
                resource_name: resource.name.clone(),
                resource_id: resource.id.clone(),
                security_group_name: group.name.clone(),
                security_group_id: group.id.clone(),
                direction,
                source,
                destination,
                protocol: protocol.clone(),
                ports: ports.clone(),
            }
        })
        .collect();

    Ok(rows)
}
