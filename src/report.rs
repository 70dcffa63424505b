//! Report assembly: region -> resource -> security group -> direction.
//!
//! Regions run concurrently, bounded by a semaphore. Each region builds
//! its own rows and the parts are joined in region order, so the final
//! table reads as if the scan had been sequential. Anything that cannot be
//! reported is recorded as a [`Gap`] and the scan moves on.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::collector::Collector;
use crate::config::AuditOptions;
use crate::error::{CollectError, FlattenError};
use crate::flatten::flatten;
use crate::model::{Attached, Direction, GroupContext, NormalizedRow, ResourceContext, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// The security group disappeared between listing and lookup.
    NotFound,
    DataShape,
    Timeout,
    ProviderUnavailable,
}

impl GapKind {
    pub const ALL: [GapKind; 4] = [
        GapKind::NotFound,
        GapKind::DataShape,
        GapKind::Timeout,
        GapKind::ProviderUnavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GapKind::NotFound => "not found",
            GapKind::DataShape => "malformed data",
            GapKind::Timeout => "timed out",
            GapKind::ProviderUnavailable => "provider unavailable",
        }
    }
}

/// Something the report could not cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub kind: GapKind,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_kind: Option<ResourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub detail: String,
}

impl Gap {
    fn new(kind: GapKind, region: &str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            region: region.to_string(),
            resource_kind: None,
            resource_id: None,
            group_id: None,
            detail: detail.into(),
        }
    }

    fn from_collect(err: &CollectError, region: &str) -> Self {
        let kind = match err {
            CollectError::Timeout { .. } => GapKind::Timeout,
            CollectError::Shape(_) | CollectError::Json(_) => GapKind::DataShape,
            CollectError::Provider { .. } | CollectError::Spawn(_) => GapKind::ProviderUnavailable,
        };
        Gap::new(kind, region, err.to_string())
    }

    fn from_shape(err: &FlattenError, region: &str) -> Self {
        Gap::new(GapKind::DataShape, region, err.to_string())
    }

    fn for_kind(mut self, kind: ResourceKind) -> Self {
        self.resource_kind = Some(kind);
        self
    }

    fn for_group(mut self, resource: &ResourceContext, group_id: &str) -> Self {
        self.resource_kind = Some(resource.kind);
        self.resource_id = Some(resource.id.clone());
        self.group_id = Some(group_id.to_string());
        self
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.region)?;
        if let Some(kind) = self.resource_kind {
            write!(f, " {}", kind)?;
        }
        if let Some(id) = &self.resource_id {
            write!(f, " {}", id)?;
        }
        if let Some(group) = &self.group_id {
            write!(f, " {}", group)?;
        }
        write!(f, ": {}", self.detail)
    }
}

/// The assembled table plus everything that was skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub regions: Vec<String>,
    pub rows: Vec<NormalizedRow>,
    pub gaps: Vec<Gap>,
}

impl Report {
    fn absorb(&mut self, part: Report) {
        self.rows.extend(part.rows);
        self.gaps.extend(part.gaps);
    }

    fn skip(&mut self, gap: Gap) {
        log::warn!("skipped {}", gap);
        self.gaps.push(gap);
    }

    pub fn gap_count(&self, kind: GapKind) -> usize {
        self.gaps.iter().filter(|g| g.kind == kind).count()
    }

    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// Scans every requested region and assembles the report.
///
/// Only region discovery is fatal; every later failure becomes a gap.
pub async fn assemble<C>(collector: Arc<C>, options: &AuditOptions) -> Result<Report, CollectError>
where
    C: Collector + 'static,
{
    let regions = match &options.regions {
        Some(regions) => regions.clone(),
        None => collector.list_regions().await?,
    };
    log::info!(
        "scanning {} region(s), {} at a time",
        regions.len(),
        options.concurrency
    );

    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mut handles = Vec::with_capacity(regions.len());

    for region in &regions {
        let collector = Arc::clone(&collector);
        let semaphore = Arc::clone(&semaphore);
        let kinds = options.kinds.clone();
        let region = region.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            collect_region(collector.as_ref(), &region, &kinds).await
        }));
    }

    let mut report = Report {
        regions: regions.clone(),
        ..Default::default()
    };
    for (region, handle) in regions.iter().zip(handles) {
        match handle.await {
            Ok(part) => report.absorb(part),
            Err(e) => report.skip(Gap::new(
                GapKind::ProviderUnavailable,
                region,
                format!("region scan aborted: {}", e),
            )),
        }
    }

    log::info!(
        "collected {} row(s) with {} gap(s)",
        report.rows.len(),
        report.gaps.len()
    );
    Ok(report)
}

/// Rows for every resource of the given kinds in one region.
pub async fn collect_region<C>(collector: &C, region: &str, kinds: &[ResourceKind]) -> Report
where
    C: Collector + ?Sized,
{
    log::info!("scanning {}", region);
    let mut report = Report::default();

    for &kind in kinds {
        let resources = match collector.list_resources(region, kind).await {
            Ok(resources) => resources,
            Err(e) => {
                report.skip(Gap::from_collect(&e, region).for_kind(kind));
                continue;
            }
        };
        log::debug!("{}: {} {}(s)", region, resources.len(), kind);

        for resource in &resources {
            let context = ResourceContext::new(region, resource);
            for group_id in resource.security_group_ids() {
                report.absorb(collect_group(collector, &context, group_id).await);
            }
        }
    }

    report
}

/// Rows for one security group attached to one resource, inbound rules
/// first, then outbound.
pub async fn collect_group<C>(collector: &C, resource: &ResourceContext, group_id: &str) -> Report
where
    C: Collector + ?Sized,
{
    let region = resource.region.as_str();
    let mut report = Report::default();

    let group = match collector.security_group(region, group_id).await {
        Ok(Some(group)) => group,
        Ok(None) => {
            report.skip(
                Gap::new(GapKind::NotFound, region, "security group no longer exists")
                    .for_group(resource, group_id),
            );
            return report;
        }
        Err(e) => {
            report.skip(Gap::from_collect(&e, region).for_group(resource, group_id));
            return report;
        }
    };

    let context = GroupContext {
        name: group.name.clone(),
        id: group.id.clone(),
    };

    for rejected in &group.rejected {
        report.skip(
            Gap::from_shape(&rejected.error, region)
                .for_group(resource, group_id),
        );
    }

    for direction in [Direction::Inbound, Direction::Outbound] {
        for rule in group.rules(direction) {
            match flatten(rule, direction, resource, &context) {
                Ok(rows) => report.rows.extend(rows),
                Err(e) => report.skip(Gap::from_shape(&e, region).for_group(resource, group_id)),
            }
        }
    }

    report
}
