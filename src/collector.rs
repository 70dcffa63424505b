//! The provider-facing side of the report: regions, resources and
//! security group lookups.

use async_trait::async_trait;

use crate::error::CollectError;
use crate::model::{Resource, ResourceKind, SecurityGroup};

#[async_trait]
pub trait Collector: Send + Sync {
    /// All regions enabled for the account.
    async fn list_regions(&self) -> Result<Vec<String>, CollectError>;

    /// Resources of one kind in a region. An empty region yields an empty
    /// vector, not an error.
    async fn list_resources(
        &self,
        region: &str,
        kind: ResourceKind,
    ) -> Result<Vec<Resource>, CollectError>;

    /// Resolves a security group, or `Ok(None)` when it no longer exists.
    async fn security_group(
        &self,
        region: &str,
        group_id: &str,
    ) -> Result<Option<SecurityGroup>, CollectError>;
}
