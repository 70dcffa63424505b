//! Validated run options.

use chrono::{DateTime, TimeZone};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::model::ResourceKind;

/// Regions scanned at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound for `concurrency`, well above the number of AWS regions.
pub const MAX_CONCURRENCY: usize = 64;

/// Limit for a single provider call, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const REPORT_PREFIX: &str = "fw_policy-report-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditOptions {
    /// `None` scans every region the account has enabled.
    pub regions: Option<Vec<String>>,
    pub kinds: Vec<ResourceKind>,
    pub concurrency: usize,
    pub call_timeout: Duration,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            regions: None,
            kinds: ResourceKind::ALL.to_vec(),
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl AuditOptions {
    /// Builds options from raw CLI values. Empty lists mean "all"; repeated
    /// entries are dropped, keeping the first occurrence.
    pub fn new(
        regions: Vec<String>,
        kinds: Vec<ResourceKind>,
        concurrency: usize,
        timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(concurrency));
        }
        if concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::ConcurrencyTooHigh {
                value: concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(timeout_secs));
        }
        for region in &regions {
            validate_region(region)?;
        }

        let regions = dedup(regions);
        let kinds = if kinds.is_empty() {
            ResourceKind::ALL.to_vec()
        } else {
            dedup(kinds)
        };

        Ok(Self {
            regions: if regions.is_empty() { None } else { Some(regions) },
            kinds,
            concurrency,
            call_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Region codes look like `eu-west-1` or `us-gov-east-1`.
fn validate_region(region: &str) -> Result<(), ConfigError> {
    let well_formed = region.contains('-')
        && !region.starts_with('-')
        && !region.ends_with('-')
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::InvalidRegion(region.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
    Xlsx,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Xlsx => "xlsx",
        }
    }
}

/// `fw_policy-report-<HH-MM-SS_DD-MM-YYYY>.<ext>` in the working directory.
pub fn default_output_path<Tz: TimeZone>(format: OutputFormat, now: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    PathBuf::from(format!(
        "{}{}.{}",
        REPORT_PREFIX,
        now.format("%H-%M-%S_%d-%m-%Y"),
        format.extension()
    ))
}
