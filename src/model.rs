//! Resources, raw rules and the normalized report row.

use serde::Serialize;
use std::fmt;

use crate::error::FlattenError;

/// Traffic direction of a rule relative to the resource it protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "Inbound",
            Direction::Outbound => "Outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of resource that carry security group attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instance,
    #[value(alias = "load_balancer")]
    LoadBalancer,
    Endpoint,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Instance,
        ResourceKind::LoadBalancer,
        ResourceKind::Endpoint,
    ];

    /// Label written to the "Resource Type" column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Instance => "instance",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::Endpoint => "endpoint",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What every resource kind exposes to the report assembler.
pub trait Attached {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn security_group_ids(&self) -> &[String];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    /// Value of the `Name` tag, if the instance has one.
    pub name_tag: Option<String>,
    pub security_group_ids: Vec<String>,
}

impl Attached for Instance {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        self.name_tag.as_deref().unwrap_or("None")
    }

    fn security_group_ids(&self) -> &[String] {
        &self.security_group_ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub arn: String,
    pub name: String,
    pub security_group_ids: Vec<String>,
}

impl Attached for LoadBalancer {
    fn id(&self) -> &str {
        &self.arn
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn security_group_ids(&self) -> &[String] {
        &self.security_group_ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub security_group_ids: Vec<String>,
}

impl Attached for Endpoint {
    fn id(&self) -> &str {
        &self.id
    }

    // Endpoints have no display name of their own.
    fn name(&self) -> &str {
        &self.id
    }

    fn security_group_ids(&self) -> &[String] {
        &self.security_group_ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Instance(Instance),
    LoadBalancer(LoadBalancer),
    Endpoint(Endpoint),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Instance(_) => ResourceKind::Instance,
            Resource::LoadBalancer(_) => ResourceKind::LoadBalancer,
            Resource::Endpoint(_) => ResourceKind::Endpoint,
        }
    }

    fn inner(&self) -> &dyn Attached {
        match self {
            Resource::Instance(r) => r,
            Resource::LoadBalancer(r) => r,
            Resource::Endpoint(r) => r,
        }
    }
}

impl Attached for Resource {
    fn id(&self) -> &str {
        self.inner().id()
    }

    fn name(&self) -> &str {
        self.inner().name()
    }

    fn security_group_ids(&self) -> &[String] {
        self.inner().security_group_ids()
    }
}

/// One authorized peer of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Cidr4(String),
    Cidr6(String),
    PeerGroup(String),
    PrefixList(String),
}

impl TargetSpec {
    pub fn label(&self) -> &str {
        match self {
            TargetSpec::Cidr4(s)
            | TargetSpec::Cidr6(s)
            | TargetSpec::PeerGroup(s)
            | TargetSpec::PrefixList(s) => s,
        }
    }

    /// Position of this kind in the flattened target order.
    pub fn rank(&self) -> u8 {
        match self {
            TargetSpec::Cidr4(_) => 0,
            TargetSpec::Cidr6(_) => 1,
            TargetSpec::PeerGroup(_) => 2,
            TargetSpec::PrefixList(_) => 3,
        }
    }
}

/// A rule as the provider returns it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRule {
    pub protocol: Option<String>,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
    pub targets: Vec<TargetSpec>,
}

/// A rule record the collector could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRule {
    pub direction: Direction,
    pub error: FlattenError,
}

/// A security group and its rules, as resolved by the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub inbound: Vec<RawRule>,
    pub outbound: Vec<RawRule>,
    pub rejected: Vec<RejectedRule>,
}

impl SecurityGroup {
    pub fn rules(&self, direction: Direction) -> &[RawRule] {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }
}

/// Identity of the resource, copied into every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContext {
    pub kind: ResourceKind,
    pub region: String,
    pub name: String,
    pub id: String,
}

impl ResourceContext {
    pub fn new(region: &str, resource: &Resource) -> Self {
        Self {
            kind: resource.kind(),
            region: region.to_string(),
            name: resource.name().to_string(),
            id: resource.id().to_string(),
        }
    }
}

/// Identity of the security group, copied into every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupContext {
    pub name: String,
    pub id: String,
}

/// One report line: resource x security group x direction x target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRow {
    pub resource_type: ResourceKind,
    pub region: String,
    pub resource_name: String,
    pub resource_id: String,
    pub security_group_name: String,
    pub security_group_id: String,
    pub direction: Direction,
    pub source: String,
    pub destination: String,
    pub protocol: String,
    pub ports: String,
}

impl NormalizedRow {
    /// Column order of the tabular report.
    pub const COLUMNS: [&'static str; 11] = [
        "Resource Type",
        "Region",
        "Resource Name",
        "Resource-ID",
        "SG-Name",
        "SG-ID",
        "Direction",
        "Source",
        "Destination",
        "Protocol",
        "Ports",
    ];

    pub fn fields(&self) -> [&str; 11] {
        [
            self.resource_type.as_str(),
            &self.region,
            &self.resource_name,
            &self.resource_id,
            &self.security_group_name,
            &self.security_group_id,
            self.direction.as_str(),
            &self.source,
            &self.destination,
            &self.protocol,
            &self.ports,
        ]
    }
}
