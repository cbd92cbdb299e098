//! Batch contradiction generation over an NDJSON file.
//!
//! Each input line carries a passage and the triples extracted from it. The triples'
//! identifiers seed the task, so the model may cite them without looking them up.
//! Successful records are written with the generated answer appended to `output`;
//! every processed line gets a status entry in `log.txt`.

use crate::agent::{Agent, AgentError, Task};
use crate::backend::GenerationError;
use crate::progress::BatchProgress;
use chrono::{DateTime, Utc};
use kg_core::tool::ToolError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_TASK: &str = "contradiction_generation";

/// What to process and where to put it.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOptions {
    pub input: PathBuf,
    /// First line to process (0-based).
    pub start: usize,
    /// Last line to process (inclusive). Defaults to the last line of the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
    /// Stop after this many successful generations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<usize>,
    pub task: String,
    /// Output directory. Defaults to a fresh `<timestamp>-<hash>` next to the input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl BatchOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            start: 0,
            end: None,
            maximum: None,
            task: DEFAULT_TASK.to_string(),
            output_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid range: start={start}, end={end}. End must be >= start")]
    InvalidRange { start: usize, end: usize },
    #[error("there are {available} lines to process but maximum is set to {maximum}")]
    NotEnoughLines { available: usize, maximum: usize },
    #[error("directory {0} already exists")]
    OutputExists(PathBuf),
    #[error("could not render run header: {0}")]
    Header(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BatchError + '_ {
    move |source| BatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Counts and locations of a finished batch.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
    pub log_file: PathBuf,
    pub processed: usize,
    pub generated: usize,
}

/// An input record ready to run.
#[derive(Debug, Clone)]
pub struct PreparedRecord {
    pub record: Value,
    pub task: Task,
}

fn string_rows(value: Option<&Value>, field: &str) -> Result<Vec<Vec<String>>, String> {
    let rows = value
        .and_then(Value::as_array)
        .ok_or_else(|| format!("missing field {field}"))?;
    rows.iter()
        .map(|row| {
            row.as_array()
                .and_then(|items| {
                    items
                        .iter()
                        .map(|v| v.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                })
                .ok_or_else(|| format!("{field} must be a list of string lists"))
        })
        .collect()
}

/// Parse one NDJSON line into the task it describes.
pub fn prepare_record(line: &str, task_name: &str) -> Result<PreparedRecord, String> {
    let record: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    let passage = record
        .get("input")
        .and_then(Value::as_str)
        .ok_or("missing field input")?
        .to_string();
    let id_rows = string_rows(
        record.pointer("/meta_obj/non_formatted_wikidata_id_output"),
        "meta_obj.non_formatted_wikidata_id_output",
    )?;
    let label_rows = string_rows(
        record.pointer("/output/0/non_formatted_surface_output"),
        "output[0].non_formatted_surface_output",
    )?;
    if !record.get("output").is_some_and(Value::is_array) {
        return Err("output must be a list".to_string());
    }

    let mut initial_ids = BTreeSet::new();
    let triples: Vec<String> = id_rows
        .iter()
        .zip(&label_rows)
        .map(|(ids, labels)| {
            initial_ids.extend(ids.iter().cloned());
            ids.iter()
                .zip(labels)
                .map(|(id, label)| format!("[{label}:{id}]"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();

    let task = Task::new(task_name)
        .arg("passage", passage)
        .arg("triples", triples.join("\n"))
        .with_initial_ids(initial_ids);
    Ok(PreparedRecord { record, task })
}

/// Status tags for a failed run. `no answer` is added separately for every failure.
pub fn failure_tags(err: &AgentError) -> Vec<&'static str> {
    match err {
        AgentError::BudgetExceeded(_) => vec!["budget exceeded"],
        AgentError::TimedOut(_)
        | AgentError::Tool(ToolError::TimedOut(_))
        | AgentError::Generation(GenerationError::Timeout(_)) => vec!["timed out"],
        AgentError::Tool(ToolError::MalformedQuery { .. }) => vec!["bad query"],
        AgentError::Tool(ToolError::ConnectionFailed(_)) => vec!["connection failed"],
        AgentError::Tool(_) => vec!["tool error"],
        AgentError::Generation(_) => vec!["generation failed"],
        AgentError::Prompt(_) => vec!["bad record"],
        AgentError::NoAnswer => vec![],
    }
}

/// Fresh directory name from the current time, e.g. `20240611-142501-3fa9c2d1`.
pub fn timestamp_and_hash(time: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(time.to_rfc3339().as_bytes());
    let result = hasher.finalize();
    format!(
        "{}-{}",
        time.format("%Y%m%d-%H%M%S"),
        &format!("{:x}", result)[..8]
    )
}

fn count_lines(path: &Path) -> Result<usize, BatchError> {
    let file = File::open(path).map_err(io_err(path))?;
    let mut n = 0;
    for line in BufReader::new(file).lines() {
        line.map_err(io_err(path))?;
        n += 1;
    }
    Ok(n)
}

#[derive(Serialize)]
struct BatchHeader<'a> {
    batch: &'a BatchOptions,
}

/// Resolve the inclusive line range and check it against `maximum`.
fn resolve_range(options: &BatchOptions) -> Result<(usize, usize), BatchError> {
    let end = match options.end {
        Some(end) => end,
        None => count_lines(&options.input)?
            .checked_sub(1)
            .ok_or(BatchError::InvalidRange {
                start: options.start,
                end: 0,
            })?,
    };
    if end < options.start {
        return Err(BatchError::InvalidRange {
            start: options.start,
            end,
        });
    }
    let available = end - options.start + 1;
    if let Some(maximum) = options.maximum
        && available < maximum
    {
        return Err(BatchError::NotEnoughLines { available, maximum });
    }
    Ok((options.start, end))
}

/// Total the progress bar should count to.
pub fn progress_total(options: &BatchOptions) -> Result<u64, BatchError> {
    let (start, end) = resolve_range(options)?;
    Ok(options.maximum.unwrap_or(end - start + 1) as u64)
}

/// Run the agent over `options.input`. `run_header` (the effective configuration) is
/// written at the top of the log.
pub async fn run_batch(
    agent: &Agent,
    options: &BatchOptions,
    run_header: &str,
    progress: &BatchProgress,
) -> Result<BatchSummary, BatchError> {
    let (start, end) = resolve_range(options)?;

    let input_name = options
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input.jsonl")
        .to_string();
    let output_dir = match &options.output_dir {
        Some(dir) => dir.clone(),
        None => options
            .input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(timestamp_and_hash(&Utc::now())),
    };
    if output_dir.exists() {
        return Err(BatchError::OutputExists(output_dir));
    }
    std::fs::create_dir_all(&output_dir).map_err(io_err(&output_dir))?;
    let log_file = output_dir.join("log.txt");
    let output_file = output_dir.join(format!("contradicted-{input_name}"));

    let mut log = File::create(&log_file).map_err(io_err(&log_file))?;
    let mut out = File::create(&output_file).map_err(io_err(&output_file))?;
    let batch_header = toml::to_string(&BatchHeader { batch: options })
        .map_err(|e| BatchError::Header(e.to_string()))?;
    writeln!(log, "{}\n{}", run_header.trim_end(), batch_header.trim_end())
        .map_err(io_err(&log_file))?;

    let input = File::open(&options.input).map_err(io_err(&options.input))?;
    let mut processed = 0;
    let mut generated = 0;
    info!(input = %options.input.display(), start, end, output = %output_dir.display(), "batch started");

    for (line_num, line) in BufReader::new(input).lines().enumerate().skip(start) {
        if line_num > end {
            break;
        }
        let line = line.map_err(io_err(&options.input))?;
        processed += 1;

        let mut tags: Vec<&'static str> = Vec::new();
        let mut success = None;
        match prepare_record(&line, &options.task) {
            Err(reason) => {
                progress.suspend(|| warn!(line = line_num, %reason, "bad record"));
                tags.push("bad record");
            }
            Ok(prepared) => match agent.run(&prepared.task).await {
                Ok(report) => success = Some((prepared.record, report.answer)),
                Err(e) => {
                    progress.suspend(|| warn!(line = line_num, error = %e, "record failed"));
                    tags.extend(failure_tags(&e));
                }
            },
        }
        if success.is_none() {
            tags.push("no answer");
        }

        let status = if tags.is_empty() {
            "ok".to_string()
        } else {
            tags.join(";")
        };
        writeln!(log, "{line_num}\t{status}").map_err(io_err(&log_file))?;

        if let Some((mut record, answer)) = success {
            if let Some(outputs) = record.get_mut("output").and_then(Value::as_array_mut) {
                outputs.push(answer);
            }
            writeln!(out, "{record}").map_err(io_err(&output_file))?;
            generated += 1;
            if options.maximum.is_some() {
                progress.tick();
            }
        }

        if options.maximum.is_none() {
            progress.tick();
        }
        progress.set_message(&format!("{generated} generated"));
        if options.maximum.is_some_and(|m| generated >= m) {
            break;
        }
    }

    progress.finish();
    info!(processed, generated, "batch finished");
    Ok(BatchSummary {
        output_dir,
        output_file,
        log_file,
        processed,
        generated,
    })
}
