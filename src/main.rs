use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;

use sgreport::aws::AwsCli;
use sgreport::config::{self, AuditOptions, OutputFormat, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_SECS};
use sgreport::model::ResourceContext;
use sgreport::report::{assemble, collect_group, GapKind};
use sgreport::{output, ResourceKind};

#[derive(Parser)]
#[command(name = "sg-report")]
#[command(version, about = "AWS Security Group Report", long_about = None)]
struct Cli {
    /// Log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// AWS CLI profile to use
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Timeout for each AWS call, in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flatten the rules of every attached security group into a report file
    Report {
        /// Region to scan (repeatable, default: all enabled regions)
        #[arg(short, long)]
        region: Vec<String>,

        /// Resource kind to include (repeatable, default: all)
        #[arg(short, long, value_enum)]
        kind: Vec<ResourceKind>,

        /// Output file (default: timestamped name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,

        /// Regions scanned at the same time
        #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },

    /// Show the flattened rules of a single security group
    Show {
        /// AWS Region
        #[arg(short, long)]
        region: String,

        /// Security group ID
        #[arg(short, long)]
        group_id: String,

        /// Resource kind to report the rows under
        #[arg(long, value_enum, default_value_t = ResourceKind::Instance)]
        kind: ResourceKind,

        /// Resource ID to report the rows under
        #[arg(long, default_value = "self")]
        resource_id: String,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Report {
            region,
            kind,
            output: output_path,
            format,
            concurrency,
        } => {
            let options = AuditOptions::new(region, kind, concurrency, cli.timeout)?;
            let path = output_path.unwrap_or_else(|| config::default_output_path(format, &Local::now()));

            output::print_banner(options.regions.as_deref());

            let collector = Arc::new(AwsCli::new(cli.profile, options.call_timeout));
            let report = assemble(collector, &options)
                .await
                .context("failed to list regions")?;

            output::write_report(&path, format, &report, Utc::now())
                .with_context(|| format!("failed to write {}", path.display()))?;
            output::print_summary(&report, &path);
        }

        Commands::Show {
            region,
            group_id,
            kind,
            resource_id,
        } => {
            let options = AuditOptions::new(vec![region.clone()], vec![kind], 1, cli.timeout)?;
            let collector = AwsCli::new(cli.profile, options.call_timeout);
            let resource = ResourceContext {
                kind,
                region,
                name: resource_id.clone(),
                id: resource_id,
            };

            let report = collect_group(&collector, &resource, &group_id).await;
            if report.gap_count(GapKind::NotFound) > 0 {
                anyhow::bail!("security group {} not found in {}", group_id, resource.region);
            }

            output::print_rows(&report.rows);
            for gap in &report.gaps {
                println!("{} {}", "✗".red(), gap);
            }
        }
    }

    Ok(())
}
