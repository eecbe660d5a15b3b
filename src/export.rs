//! Record exports: CSV files and shareable text summaries.

use std::fmt::Write;

use serde::Deserialize;

use crate::error::{Result, ServerError};
use crate::record::{DateRange, MilkRecord, Status};
use crate::stats;

const CSV_HEADER: [&str; 7] = [
    "Date",
    "Liters",
    "Status",
    "Type",
    "Notes",
    "AutoMarked",
    "CreatedAt",
];
const EMPTY_SUMMARY: &str = "No milk records found for the specified period.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Text,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain; charset=utf-8",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// Rendered export ready to be downloaded.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportFile {
    pub data: String,
    pub filename: String,
    pub format: ExportFormat,
}

/// Render `records` (oldest first) for `range`.
pub fn render(records: &[MilkRecord], range: DateRange, format: ExportFormat) -> Result<ExportFile> {
    let bound = |day: Option<chrono::NaiveDate>| {
        day.map(|d| d.to_string()).unwrap_or_else(|| "all".to_owned())
    };
    let (start, end) = (bound(range.start), bound(range.end));

    Ok(match format {
        ExportFormat::Csv => ExportFile {
            data: to_csv(records)?,
            filename: format!("milkit-records-{start}-{end}.csv"),
            format,
        },
        ExportFormat::Text => ExportFile {
            data: text_summary(records, range),
            filename: format!("milkit-summary-{start}-{end}.txt"),
            format,
        },
    })
}

/// One row per record under a fixed header.
pub fn to_csv(records: &[MilkRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_error = |err: csv::Error| ServerError::internal("cannot write csv", err);

    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    for record in records {
        writer
            .write_record([
                record.date.to_string(),
                record.liters.to_string(),
                record.status.to_string(),
                record.milk_type.to_string(),
                record.notes.clone(),
                if record.is_auto_marked { "Yes" } else { "No" }.to_owned(),
                record.created_at.to_rfc3339(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| ServerError::internal("cannot flush csv", err.into_error()))?;
    String::from_utf8(bytes).map_err(|err| ServerError::internal("csv is not utf-8", err))
}

fn status_label(status: Status) -> String {
    let name = status.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Human-readable summary: totals, status counts, then each day in
/// ascending order.
pub fn text_summary(records: &[MilkRecord], range: DateRange) -> String {
    if records.is_empty() {
        return EMPTY_SUMMARY.to_owned();
    }

    let statistics = stats::range_statistics(records);
    let mut sorted: Vec<&MilkRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.date);

    // Writing into a `String` never fails.
    let mut summary = String::from("MilkIt - Milk Delivery Summary\n");
    summary.push_str("=====================================\n\n");
    if let (Some(start), Some(end)) = (range.start, range.end) {
        let _ = writeln!(summary, "Period: {start} to {end}");
    }
    let _ = writeln!(summary, "Total Records: {}", records.len());
    let _ = writeln!(summary, "Total Milk Received: {:.2} liters", statistics.total_liters);
    let _ = writeln!(summary, "Average per Day: {:.2} liters\n", statistics.average_liters);

    summary.push_str("Delivery Status:\n");
    let _ = writeln!(summary, "- Received: {} days", statistics.received_count);
    let _ = writeln!(summary, "- Missed: {} days", statistics.not_received_count);
    let _ = writeln!(summary, "- Partial: {} days\n", statistics.partial_count);

    summary.push_str("Daily Records:\n");
    summary.push_str("==============\n");
    for record in sorted {
        let _ = writeln!(
            summary,
            "{}: {}L - {}{}",
            record.date,
            record.liters,
            status_label(record.status),
            if record.is_auto_marked { " (Auto)" } else { "" },
        );
        if !record.notes.is_empty() {
            let _ = writeln!(summary, "  Note: {}", record.notes);
        }
    }

    summary
}
