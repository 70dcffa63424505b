//! Flattens the security group rules attached to every instance, load
//! balancer and VPC endpoint of an AWS account into one row per
//! resource, group, direction and peer.

pub mod aws;
pub mod collector;
pub mod config;
pub mod error;
pub mod flatten;
pub mod model;
pub mod output;
pub mod report;

pub use collector::Collector;
pub use error::{CollectError, ConfigError, FlattenError};
pub use flatten::flatten;
pub use model::{Direction, NormalizedRow, RawRule, ResourceKind, TargetSpec};
pub use report::{assemble, Gap, GapKind, Report};
