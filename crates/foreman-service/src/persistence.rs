//! On-disk persistence for jobs and run event logs (spec.md §4.7).
//!
//! Layout rooted at `<prefix>`:
//! ```text
//! jobs/<jobId>.json          one file per job, pretty-printed JSON
//! runs/<runId>/events.jsonl  append-only, one event per line
//! ```
//!
//! Unparseable lines in an events file are skipped during replay, the same
//! tolerance the teacher's JSONL event history reader applies.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use foreman_proto::{Event, Job, JobId, RunId};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job {0} not found")]
    JobNotFound(JobId),
}

pub struct JobStore {
    jobs_dir: PathBuf,
}

impl JobStore {
    pub fn new(prefix: &Path) -> Self {
        Self {
            jobs_dir: prefix.join("jobs"),
        }
    }

    fn path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir.join(format!("{id}.json"))
    }

    pub fn ensure_dir(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.jobs_dir)?;
        Ok(())
    }

    pub fn save(&self, job: &Job) -> Result<(), PersistenceError> {
        self.ensure_dir()?;
        let content = serde_json::to_string_pretty(job)?;
        fs::write(self.path(&job.id), content)?;
        Ok(())
    }

    pub fn get(&self, id: &JobId) -> Result<Job, PersistenceError> {
        let content = fs::read_to_string(self.path(id))
            .map_err(|_| PersistenceError::JobNotFound(id.clone()))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn delete(&self, id: &JobId) -> Result<(), PersistenceError> {
        fs::remove_file(self.path(id)).map_err(|_| PersistenceError::JobNotFound(id.clone()))
    }

    /// All jobs, sorted by `createdAt` ascending (spec.md §4.7, `GET /jobs`).
    pub fn list(&self) -> Result<Vec<Job>, PersistenceError> {
        self.ensure_dir()?;
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.jobs_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(entry.path()) {
                Ok(content) => match serde_json::from_str::<Job>(&content) {
                    Ok(job) => jobs.push(job),
                    Err(err) => warn!(path = %entry.path().display(), %err, "failed to parse job file"),
                },
                Err(err) => warn!(path = %entry.path().display(), %err, "failed to read job file"),
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

pub struct RunEventStore {
    runs_dir: PathBuf,
}

impl RunEventStore {
    pub fn new(prefix: &Path) -> Self {
        Self {
            runs_dir: prefix.join("runs"),
        }
    }

    fn events_path(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir.join(run_id.as_str()).join("events.jsonl")
    }

    /// Appends one JSON line. Ensures the run's directory exists on first
    /// write (spec.md §4.7 persistence subscriber: "ensures the directory
    /// exists once, then appends one line per event").
    pub fn append(&self, run_id: &RunId, event: &Event) -> Result<(), PersistenceError> {
        let path = self.events_path(run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn exists(&self, run_id: &RunId) -> bool {
        self.events_path(run_id).exists()
    }

    /// Replays every persisted event for `run_id`, in file order. Lines that
    /// fail to parse are skipped, not fatal.
    pub fn read_all(&self, run_id: &RunId) -> Result<Vec<Event>, PersistenceError> {
        let path = self.events_path(run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut events = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(run = %run_id, line = line_no + 1, %err, "skipping unparseable event line"),
            }
        }
        Ok(events)
    }

    /// The status implied by the last line of the run's event file, per
    /// spec.md `/runs/status`: `running` if the file exists but carries no
    /// terminal event yet, `unknown` if no file exists.
    pub fn derive_status(&self, run_id: &RunId) -> RunStatus {
        if !self.exists(run_id) {
            return RunStatus::Unknown;
        }
        match self.read_all(run_id) {
            Ok(events) => match events.last() {
                Some(event) if event.is_terminal() => RunStatus::Terminal(event.tag()),
                _ => RunStatus::Running,
            },
            Err(_) => RunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Terminal(&'static str),
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Terminal(tag) => tag,
            RunStatus::Unknown => "unknown",
        }
    }
}
