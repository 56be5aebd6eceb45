//! Pure progress state machine over plotter output lines.
//!
//! Keyed on a small closed set of line prefixes; no I/O. The supervisor
//! feeds it every stdout line and reacts to the returned events.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// Sort buckets per computation pass (the `-u 128` launch parameter).
/// Buckets of the second compression pass are offset by this count.
pub const SORT_BUCKETS: u32 = 128;

static PHASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Starting phase (\d+)/").unwrap());
static COMPUTE_TABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Computing table (\d+)").unwrap());
static BACKPROP_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Backpropagating on table (\d+)").unwrap());
static COMPRESS_TABLES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Compressing tables (\d+) and (\d+)").unwrap());
static BUCKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Bucket (\d+)").unwrap());
static RENAMED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^Renamed final file from ".*" to "([^"]+)""#).unwrap());

const RUN_ID_PREFIX: &str = "ID: ";
const FIRST_PASS_DONE: &str = "First computation pass time";
const SECOND_PASS_DONE: &str = "Second computation pass time";

/// A state change extracted from one output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// New phase started; sub-state was reset.
    Phase(u8),
    /// Table index within the phase. Backpropagation counts tables down,
    /// so its index is reported as `8 - table`.
    Table(u8),
    /// Bucket step within the table, offset by [`SORT_BUCKETS`] during a
    /// second computation pass.
    Step(u32),
    /// The plotter announced its run identifier.
    RunId(String),
    /// The plotter renamed the finished plot to its final file name.
    FinalFile(String),
}

/// Tracks phase/table/step across a plot run.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    phase: Option<u8>,
    table: Option<u8>,
    step: Option<u32>,
    second_pass: bool,
    run_id: Option<String>,
    final_file: Option<String>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Option<u8> {
        self.phase
    }

    pub fn table(&self) -> Option<u8> {
        self.table
    }

    pub fn step(&self) -> Option<u32> {
        self.step
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn final_file(&self) -> Option<&str> {
        self.final_file.as_deref()
    }

    /// Feeds one output line; returns the resulting state change, if any.
    pub fn observe(&mut self, line: &str) -> Option<ProgressEvent> {
        if let Some(rest) = line.strip_prefix(RUN_ID_PREFIX) {
            let id = rest.trim().to_string();
            self.run_id = Some(id.clone());
            return Some(ProgressEvent::RunId(id));
        }
        if let Some(caps) = PHASE.captures(line) {
            let phase = parse_u8(&caps[1]);
            self.phase = Some(phase);
            self.table = None;
            self.step = None;
            self.second_pass = false;
            return Some(ProgressEvent::Phase(phase));
        }
        if let Some(caps) = COMPUTE_TABLE.captures(line) {
            let table = parse_u8(&caps[1]);
            self.table = Some(table);
            self.step = None;
            return Some(ProgressEvent::Table(table));
        }
        if let Some(caps) = BACKPROP_TABLE.captures(line) {
            // Backpropagation walks tables 7 down to 1.
            let table = 8u8.saturating_sub(parse_u8(&caps[1]));
            self.table = Some(table);
            self.step = None;
            return Some(ProgressEvent::Table(table));
        }
        if let Some(caps) = COMPRESS_TABLES.captures(line) {
            let table = parse_u8(&caps[1]);
            self.table = Some(table);
            self.step = None;
            self.second_pass = false;
            return Some(ProgressEvent::Table(table));
        }
        if line.starts_with(FIRST_PASS_DONE) {
            self.second_pass = true;
            return None;
        }
        if line.starts_with(SECOND_PASS_DONE) {
            self.second_pass = false;
            return None;
        }
        if let Some(caps) = BUCKET.captures(line) {
            let bucket: u32 = caps[1].parse().unwrap_or(0);
            let step = if self.second_pass {
                bucket + SORT_BUCKETS
            } else {
                bucket
            };
            self.step = Some(step);
            return Some(ProgressEvent::Step(step));
        }
        if let Some(caps) = RENAMED.captures(line) {
            let name = caps[1].to_string();
            self.final_file = Some(name.clone());
            return Some(ProgressEvent::FinalFile(name));
        }
        None
    }
}

fn parse_u8(digits: &str) -> u8 {
    digits.parse().unwrap_or(0)
}
