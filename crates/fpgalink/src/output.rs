use std::fmt::Write as _;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use fpgalink_frame::{Outcome, ResponseStatus, ResultRecord};
use fpgalink_pipeline::PipelineSummary;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct RecordOutput<'a> {
    #[serde(flatten)]
    record: &'a ResultRecord,
    timestamp: String,
}

/// Prints result records as they arrive.
///
/// JSON, pretty and raw output stream one record at a time. Table output is
/// collected and rendered once by [`ResultPrinter::finish`].
pub struct ResultPrinter {
    format: OutputFormat,
    rows: Vec<Vec<String>>,
    printed: u64,
}

impl ResultPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            rows: Vec::new(),
            printed: 0,
        }
    }

    pub fn print(&mut self, record: &ResultRecord) {
        self.printed += 1;
        match self.format {
            OutputFormat::Json => {
                let out = RecordOutput {
                    record,
                    timestamp: now_unix_seconds(),
                };
                println!(
                    "{}",
                    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Table => self.rows.push(table_row(record)),
            OutputFormat::Pretty => println!("{}", pretty_line(record)),
            OutputFormat::Raw => print_raw(&record.payload),
        }
    }

    /// Render any collected table and return how many records were printed.
    pub fn finish(self) -> u64 {
        if self.format == OutputFormat::Table && !self.rows.is_empty() {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "KIND", "INSTRUCTIONS", "OUTCOME", "STATUS", "PAYLOAD"]);
            for row in self.rows {
                table.add_row(row);
            }
            println!("{table}");
        }
        self.printed
    }
}

/// Print the run summary. JSON and raw output leave it to the logs.
pub fn print_summary(summary: &PipelineSummary, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in summary_counters(summary) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = summary_counters(summary)
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("summary: {line}");
        }
        OutputFormat::Json | OutputFormat::Raw => {}
    }
}

fn summary_counters(summary: &PipelineSummary) -> [(&'static str, u64); 9] {
    [
        ("instructions", summary.packager.instructions),
        ("dropped", summary.packager.dropped),
        ("frames", summary.driver.frames_written),
        ("write_retries", summary.driver.write_retries),
        ("completed", summary.driver.completed),
        ("no_response", summary.driver.no_response),
        ("decode_errors", summary.driver.decode_errors),
        ("unexpected", summary.driver.unexpected),
        ("stale_responses", summary.driver.stale_responses),
    ]
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn table_row(record: &ResultRecord) -> Vec<String> {
    let outcome = match outcome_reason(&record.outcome) {
        Some(reason) => format!("{} ({reason})", record.outcome_name()),
        None => record.outcome_name().to_string(),
    };
    vec![
        record.seq.to_string(),
        record.kind.to_string(),
        instruction_list(record),
        outcome,
        record.status.map(status_name).unwrap_or_else(|| "-".to_string()),
        hex(&record.payload),
    ]
}

fn pretty_line(record: &ResultRecord) -> String {
    let mut line = format!(
        "seq={} kind={} instructions={} outcome={}",
        record.seq,
        record.kind,
        instruction_list(record),
        record.outcome_name()
    );
    if let Some(reason) = outcome_reason(&record.outcome) {
        let _ = write!(line, " reason=\"{reason}\"");
    }
    if let Some(status) = record.status {
        let _ = write!(line, " status={}", status_name(status));
    }
    if !record.payload.is_empty() {
        let _ = write!(line, " payload={}", hex(&record.payload));
    }
    line
}

fn outcome_reason(outcome: &Outcome) -> Option<&str> {
    match outcome {
        Outcome::Unexpected { reason } | Outcome::DecodeError { reason } => Some(reason),
        Outcome::Completed | Outcome::NoResponse => None,
    }
}

fn instruction_list(record: &ResultRecord) -> String {
    record
        .instruction_ids
        .iter()
        .map(|id| id.0.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn status_name(status: ResponseStatus) -> String {
    match status {
        ResponseStatus::Ok => "ok".to_string(),
        ResponseStatus::Busy => "busy".to_string(),
        ResponseStatus::Rejected => "rejected".to_string(),
        ResponseStatus::Overflow => "overflow".to_string(),
        ResponseStatus::Unknown(code) => format!("0x{code:02X}"),
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().fold(String::with_capacity(data.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
