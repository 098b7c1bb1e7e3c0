use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{ActionVector, StateVector};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("could not read log {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Drop lines that fail to parse instead of aborting the load
    pub skip_malformed: bool,
}

/// States and actions of every `"log"` record, in file order.
#[derive(Debug, Clone, Default)]
pub struct GameLog {
    pub states: Vec<StateVector>,
    pub actions: Vec<ActionVector>,
    /// Episode key per record; `None` when the record carries no `episode`
    pub episodes: Vec<Option<String>>,
    /// Malformed lines dropped because of [`LoadOptions::skip_malformed`]
    pub skipped: usize,
    /// Well-formed records whose type is not `"log"`
    pub ignored: usize,
}

impl GameLog {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn push(&mut self, record: LogRecord) {
        self.states.push(record.state);
        self.actions.push(record.action);
        self.episodes.push(record.episode);
    }
}

/// One parsed `"log"` line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub state: StateVector,
    pub action: ActionVector,
    pub episode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    state: RawState,
    action: RawAction,
    #[serde(default)]
    episode: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawState {
    pos_x: f32,
    pos_y: f32,
    pos_z: f32,
    speed: f32,
    rot: f32,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(deserialize_with = "flag")]
    up: bool,
    #[serde(deserialize_with = "flag")]
    down: bool,
    #[serde(deserialize_with = "flag")]
    left: bool,
    #[serde(deserialize_with = "flag")]
    right: bool,
}

/// Accepts `true`/`false` as well as numeric 0/1 flags.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean flag, found {other}"
        ))),
    }
}

fn episode_key(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Parses one NDJSON line.
///
/// Returns `Ok(None)` for records whose `type` is anything other than `"log"`.
pub fn parse_record(line: &str) -> Result<Option<LogRecord>, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("type").and_then(Value::as_str) != Some("log") {
        return Ok(None);
    }

    let entry: LogEntry = serde_json::from_value(value)?;
    let s = entry.state;
    let a = entry.action;
    let bit = |b: bool| if b { 1.0 } else { 0.0 };

    Ok(Some(LogRecord {
        state: [s.pos_x, s.pos_y, s.pos_z, s.speed, s.rot],
        action: [bit(a.up), bit(a.down), bit(a.left), bit(a.right)],
        episode: entry.episode.and_then(episode_key),
    }))
}

/// Reads a game log from any buffered reader. Line order is kept as-is and
/// treated as chronological.
pub fn read_log<R: BufRead>(reader: R, options: &LoadOptions) -> Result<GameLog, LoadError> {
    let mut log = GameLog::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| LoadError::Io {
            path: PathBuf::from("<reader>"),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }

        match parse_record(&line) {
            Ok(Some(record)) => log.push(record),
            Ok(None) => log.ignored += 1,
            Err(source) if options.skip_malformed => {
                warn!(line = line_no, error = %source, "skipping malformed record");
                log.skipped += 1;
            }
            Err(source) => {
                return Err(LoadError::Malformed {
                    line: line_no,
                    source,
                })
            }
        }
    }

    Ok(log)
}

/// Loads a newline-delimited JSON game log from disk.
pub fn load_log(path: impl AsRef<Path>, options: &LoadOptions) -> Result<GameLog, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let log = read_log(BufReader::new(file), options).map_err(|err| match err {
        LoadError::Io { source, .. } => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;

    debug!(
        path = %path.display(),
        records = log.len(),
        ignored = log.ignored,
        skipped = log.skipped,
        "game log loaded"
    );
    Ok(log)
}
