//! `roster status`: local controller records.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use roster_core::store;
use roster_core::types::LocalRecord;

/// Arguments for `roster status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Include retired (soft-deleted) records.
    #[arg(long)]
    pub all: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let file = store::load().context("failed to load local roster")?;

        let mut records: Vec<LocalRecord> = if self.all {
            file.records.clone()
        } else {
            file.active_records()
        };
        records.sort_by_key(|r| r.cid);

        if self.json {
            print_json(&file.records, records)?;
            return Ok(());
        }

        print_table(&file.records, records);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusJson {
    summary: StatusSummaryJson,
    records: Vec<LocalRecord>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    active: usize,
    retired: usize,
    members: usize,
    visiting: usize,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "cid")]
    cid: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "oi")]
    oi: String,
    #[tabled(rename = "rating")]
    rating: i32,
    #[tabled(rename = "member")]
    member: String,
    #[tabled(rename = "visiting")]
    visiting: String,
    #[tabled(rename = "roles")]
    roles: String,
}

fn summarize(all: &[LocalRecord]) -> StatusSummaryJson {
    let active: Vec<&LocalRecord> = all.iter().filter(|r| r.is_active()).collect();
    StatusSummaryJson {
        active: active.len(),
        retired: all.len() - active.len(),
        members: active.iter().filter(|r| r.member).count(),
        visiting: active.iter().filter(|r| r.visiting).count(),
    }
}

fn print_json(all: &[LocalRecord], records: Vec<LocalRecord>) -> Result<()> {
    let payload = StatusJson {
        summary: summarize(all),
        records,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(all: &[LocalRecord], records: Vec<LocalRecord>) {
    let summary = summarize(all);
    println!(
        "Roster v{} | {} active | {} members | {} visiting | {} retired",
        env!("CARGO_PKG_VERSION"),
        summary.active,
        summary.members,
        summary.visiting,
        summary.retired,
    );

    if records.is_empty() {
        println!("No controllers on the local roster. Run 'roster sync' to populate it.");
        return;
    }

    let rows: Vec<RecordRow> = records
        .into_iter()
        .map(|record| RecordRow {
            cid: record.cid.to_string(),
            name: if record.is_active() {
                record.full_name()
            } else {
                format!("{} (retired)", record.full_name()).bright_black().to_string()
            },
            oi: record
                .oi
                .as_ref()
                .map(|oi| oi.to_string().bold().to_string())
                .unwrap_or_else(|| "-".to_string()),
            rating: record.rating,
            member: yes_no(record.member),
            visiting: yes_no(record.visiting),
            roles: record.roles.join(", "),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn yes_no(flag: bool) -> String {
    if flag {
        "yes".green().to_string()
    } else {
        "no".to_string()
    }
}
