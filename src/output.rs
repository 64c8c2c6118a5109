use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::links::LinkedObjects;
use crate::pipeline::{FilteredResult, ProgressEvent, ProgressSink};
use crate::presence::PresenceOutcome;
use crate::remote::Row;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_result(result: &FilteredResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_rows(rows: &[Row]) -> io::Result<()> {
        Self::print_json(&rows)
    }

    pub fn print_linked(linked: &LinkedObjects) -> io::Result<()> {
        Self::print_json(linked)
    }

    pub fn print_presence(outcome: &PresenceOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_result(result: &FilteredResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        let stages = result
            .stages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        writeln!(stdout, "stages:      {stages}")?;
        writeln!(stdout, "samples:     {}", result.object_ids.len())?;
        writeln!(stdout, "rows:        {}", result.rows.len())?;
        writeln!(stdout, "table:       {}", result.table_path)?;
        writeln!(stdout, "summary:     {}", result.summary_path)?;
        writeln!(
            stdout,
            "downloads:   {} ok, {} failed, {} without file",
            result.downloads.downloaded.len(),
            result.downloads.failed.len(),
            result.downloads.skipped.len()
        )?;
        for (sample, linked) in result.mapping.iter() {
            let linked = linked
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(stdout, "  {sample}: {linked}")?;
        }
        for failure in &result.downloads.failed {
            writeln!(
                stdout,
                "  failed {} ({}): {}",
                failure.linked_objectid, failure.file_path, failure.reason
            )?;
        }
        Ok(())
    }
}
