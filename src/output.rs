//! Report files and console output.

use chrono::{DateTime, Utc};
use colored::*;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::fs;
use std::io;
use std::path::Path;

use crate::config::OutputFormat;
use crate::model::{Direction, NormalizedRow};
use crate::report::{GapKind, Report};

/// Quotes a CSV field when it holds a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_csv(rows: &[NormalizedRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(NormalizedRow::COLUMNS.join(","));

    for row in rows {
        let fields: Vec<String> = row.fields().iter().map(|f| csv_field(f)).collect();
        lines.push(fields.join(","));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn render_json(report: &Report, generated_at: DateTime<Utc>) -> serde_json::Result<String> {
    let doc = serde_json::json!({
        "generated_at": generated_at.to_rfc3339(),
        "regions": report.regions,
        "total_rows": report.rows.len(),
        "rows": report.rows,
        "gaps": report.gaps,
    });
    serde_json::to_string_pretty(&doc)
}

/// Workbook with a bold header row and one worksheet row per report row.
pub fn render_xlsx(rows: &[NormalizedRow]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Security Groups")?;

    for (col, title) in (0u16..).zip(NormalizedRow::COLUMNS) {
        sheet.write_string_with_format(0, col, title, &header)?;
    }
    for (row_num, row) in (1u32..).zip(rows) {
        for (col, value) in (0u16..).zip(row.fields()) {
            sheet.write_string(row_num, col, value)?;
        }
    }

    workbook.save_to_buffer()
}

/// Writes the report in the requested format, replacing any existing file.
pub fn write_report(
    path: &Path,
    format: OutputFormat,
    report: &Report,
    generated_at: DateTime<Utc>,
) -> io::Result<()> {
    let content = match format {
        OutputFormat::Csv => render_csv(&report.rows).into_bytes(),
        OutputFormat::Json => render_json(report, generated_at)?.into_bytes(),
        OutputFormat::Xlsx => render_xlsx(&report.rows)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?,
    };
    fs::write(path, content)
}

pub fn print_banner(regions: Option<&[String]>) {
    println!("{}", "Collecting Security Groups information...".cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    match regions {
        Some(regions) => println!("Regions: {}", regions.join(", ").yellow()),
        None => println!("Regions: {}", "all enabled".yellow()),
    }
    println!();
}

pub fn print_summary(report: &Report, path: &Path) {
    println!("{}", "═".repeat(70).bright_black());
    println!(
        "{} {} has been created",
        "✅".green(),
        path.display().to_string().cyan().bold()
    );
    println!(
        "Rows: {}  Regions: {}",
        report.rows.len().to_string().green().bold(),
        report.regions.len().to_string().cyan()
    );

    if report.is_complete() {
        println!("{}", "No gaps: every security group was reported".green());
        return;
    }

    println!(
        "{} {} unit(s) could not be reported:",
        "⚠️".yellow(),
        report.gaps.len().to_string().yellow().bold()
    );
    for kind in GapKind::ALL {
        let count = report.gap_count(kind);
        if count > 0 {
            println!("  {}: {}", kind.as_str(), count.to_string().yellow());
        }
    }
    println!();
    for gap in &report.gaps {
        println!("  {} {}", "✗".red(), gap.to_string().bright_black());
    }
}

/// Rows of a single security group, one line per target.
pub fn print_rows(rows: &[NormalizedRow]) {
    if rows.is_empty() {
        println!("{}", "No rules".yellow());
        return;
    }

    let first = &rows[0];
    println!(
        "🛡️  {} ({}) {}",
        first.security_group_name.cyan().bold(),
        first.security_group_id.bright_black(),
        first.region.yellow()
    );

    for direction in [Direction::Inbound, Direction::Outbound] {
        let matching: Vec<&NormalizedRow> = rows.iter().filter(|r| r.direction == direction).collect();
        if matching.is_empty() {
            continue;
        }
        println!();
        match direction {
            Direction::Inbound => println!("{} Inbound Rules:", "⬇️".green()),
            Direction::Outbound => println!("{} Outbound Rules:", "⬆️".red()),
        }
        for row in matching {
            println!(
                "  • {} {} {} → {}",
                row.protocol.yellow(),
                row.ports.cyan(),
                row.source.green(),
                row.destination.green()
            );
        }
    }
    println!();
}
