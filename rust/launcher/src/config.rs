//! Launch file parsing.
//!
//! A launch file names the external program and holds one or more jobs.
//! `[defaults]` is merged under every `[[jobs]]` entry, then command-line
//! assignments are merged on top before the job is deserialized.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use sparo_config::{JobConfig, JobConfigError};

/// Launch file as written on disk (before merging).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLaunchFile {
    #[serde(default)]
    launcher: LauncherSettings,
    #[serde(default = "empty_table")]
    defaults: toml::Value,
    #[serde(default)]
    jobs: Vec<toml::Value>,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

/// Launch file with defaults merged into each job table.
///
/// Jobs stay as TOML tables until one is selected, so a broken job only
/// fails when it is the one being launched.
#[derive(Debug, Clone)]
pub struct LaunchFile {
    pub launcher: LauncherSettings,
    jobs: Vec<toml::Value>,
}

/// How the external program is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LauncherSettings {
    /// Distributed launcher executable.
    #[serde(default = "default_program")]
    pub program: String,
    /// Python module run by the launcher (`-m <module>`); `None` passes nothing.
    #[serde(default = "default_entry_module")]
    pub entry_module: Option<String>,
    /// Working directory for the child.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Create the job's `logs` directory before spawning.
    #[serde(default = "default_true")]
    pub create_logs_dir: bool,
    /// Where the child's output goes.
    #[serde(default)]
    pub stdio: StdioMode,
    /// Extra environment for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Output handling for the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StdioMode {
    /// Child writes straight to our stdout/stderr.
    #[default]
    Inherit,
    /// Output is forwarded to our stdout/stderr and appended to log files in the run directory.
    Tee,
}

fn default_program() -> String {
    "torchrun".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_entry_module() -> Option<String> {
    Some("training.main".to_string())
}

fn default_true() -> bool {
    true
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            entry_module: default_entry_module(),
            working_dir: None,
            create_logs_dir: true,
            stdio: StdioMode::default(),
            env: BTreeMap::new(),
        }
    }
}

/// Merge two TOML tables, with `overlay` values taking precedence.
fn merge_toml(base: &toml::Value, overlay: &toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in overlay_map {
                merged.insert(
                    k.clone(),
                    if let Some(base_v) = base_map.get(k) {
                        merge_toml(base_v, v)
                    } else {
                        v.clone()
                    },
                );
            }
            toml::Value::Table(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Split `key=value`, rejecting empty keys and empty dotted segments.
fn split_assignment(assignment: &str) -> Result<(&str, &str), LaunchFileError> {
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| LaunchFileError::Assignment(assignment.to_string()))?;
    let key = key.trim();
    if key.is_empty() || key.split('.').any(|part| part.trim().is_empty()) {
        return Err(LaunchFileError::Assignment(assignment.to_string()));
    }
    Ok((key, raw.trim()))
}

/// Parse a raw value as TOML, falling back to a plain string.
fn parse_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

/// Wrap `value` in one table per dotted key segment.
fn nest(key: &str, mut value: toml::Value) -> toml::Value {
    for part in key.rsplit('.') {
        let mut table = toml::map::Map::new();
        table.insert(part.trim().to_string(), value);
        value = toml::Value::Table(table);
    }
    value
}

fn lookup<'a>(base: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.').try_fold(base, |v, part| v.get(part.trim()))
}

/// Parse a `key=value` assignment into a one-entry (possibly nested) table.
///
/// Dotted keys nest (`launcher.program=python`). The value is parsed as a
/// TOML value; anything that does not parse is taken as a plain string, so
/// `precision=amp` and `precision="amp"` mean the same.
pub fn parse_assignment(assignment: &str) -> Result<toml::Value, LaunchFileError> {
    let (key, raw) = split_assignment(assignment)?;
    Ok(nest(key, parse_value(raw)))
}

/// Like [`parse_assignment`], but a scalar assigned over a string in `base`
/// stays a string, so `name=2024` or `model=inf` keep their text.
fn parse_assignment_over(
    base: &toml::Value,
    assignment: &str,
) -> Result<toml::Value, LaunchFileError> {
    let (key, raw) = split_assignment(assignment)?;
    let mut value = parse_value(raw);
    let scalar = !(value.is_str() || value.is_array() || value.is_table());
    if scalar && lookup(base, key).is_some_and(toml::Value::is_str) {
        value = toml::Value::String(raw.to_string());
    }
    Ok(nest(key, value))
}

impl LaunchFile {
    /// Load a launch file, merging defaults into each job.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LaunchFileError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LaunchFileError::Io(path.as_ref().display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Parse launch file contents.
    pub fn parse(content: &str) -> Result<Self, LaunchFileError> {
        let raw: RawLaunchFile =
            toml::from_str(content).map_err(|e| LaunchFileError::Parse(e.to_string()))?;

        if !raw.defaults.is_table() {
            return Err(LaunchFileError::Parse("`defaults` must be a table".into()));
        }

        let jobs = raw
            .jobs
            .iter()
            .map(|job| {
                if job.is_table() {
                    Ok(merge_toml(&raw.defaults, job))
                } else {
                    Err(LaunchFileError::Parse("each `jobs` entry must be a table".into()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let file = Self {
            launcher: raw.launcher,
            jobs,
        };
        let mut names = file.job_names();
        names.sort();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(LaunchFileError::DuplicateJob(dup[0].clone()));
        }
        Ok(file)
    }

    /// Names of all jobs, in file order. Jobs without a string `name` are listed as `<unnamed>`.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        self.jobs
            .iter()
            .map(|j| {
                j.get("name")
                    .and_then(toml::Value::as_str)
                    .unwrap_or("<unnamed>")
                    .to_string()
            })
            .collect()
    }

    /// Resolve one job: select it, apply assignments, deserialize and validate.
    ///
    /// With no `name`, the file must hold exactly one job. Assignments whose
    /// key starts with `launcher.` are rejected here; see [`Self::apply_launcher`].
    pub fn job(
        &self,
        name: Option<&str>,
        assignments: &[String],
    ) -> Result<JobConfig, LaunchFileError> {
        let base = self.select(name)?;

        let mut merged = base.clone();
        for assignment in assignments {
            let overlay = parse_assignment_over(&merged, assignment)?;
            if overlay.get("launcher").is_some() {
                return Err(LaunchFileError::Assignment(assignment.clone()));
            }
            merged = merge_toml(&merged, &overlay);
        }

        let job_name = merged
            .get("name")
            .and_then(toml::Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();

        let job: JobConfig = merged.try_into().map_err(|e: toml::de::Error| {
            LaunchFileError::Job(job_name.clone(), e.message().to_string())
        })?;
        job.validate()
            .map_err(|e| LaunchFileError::Invalid(job_name, e))?;

        for warning in job
            .override_model_config
            .as_ref()
            .map(sparo_config::ModelOverride::lint)
            .unwrap_or_default()
        {
            tracing::warn!("{}: model config override: {}", job.name, warning);
        }

        Ok(job)
    }

    /// Apply `launcher.*` assignments to the launcher settings.
    pub fn apply_launcher(&mut self, assignments: &[String]) -> Result<(), LaunchFileError> {
        let mut settings = toml::Value::try_from(&self.launcher)
            .map_err(|e| LaunchFileError::Parse(e.to_string()))?;
        for assignment in assignments {
            let overlay = parse_assignment(assignment)?;
            match overlay.get("launcher") {
                Some(launcher) => settings = merge_toml(&settings, launcher),
                None => return Err(LaunchFileError::Assignment(assignment.clone())),
            }
        }
        self.launcher = settings
            .try_into()
            .map_err(|e: toml::de::Error| LaunchFileError::Parse(e.message().to_string()))?;
        Ok(())
    }

    fn select(&self, name: Option<&str>) -> Result<&toml::Value, LaunchFileError> {
        match name {
            Some(name) => self
                .jobs
                .iter()
                .find(|j| j.get("name").and_then(toml::Value::as_str) == Some(name))
                .ok_or_else(|| LaunchFileError::UnknownJob(name.to_string(), self.job_names())),
            None => match self.jobs.as_slice() {
                [only] => Ok(only),
                [] => Err(LaunchFileError::NoJobs),
                _ => Err(LaunchFileError::Ambiguous(self.job_names())),
            },
        }
    }
}

/// Errors that can occur when loading a launch file or resolving a job.
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("failed to read launch file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse launch file: {0}")]
    Parse(String),
    #[error("invalid assignment '{0}', expected key=value")]
    Assignment(String),
    #[error("job name '{0}' is used more than once")]
    DuplicateJob(String),
    #[error("launch file has no jobs")]
    NoJobs,
    #[error("launch file has several jobs, pick one with --job: {}", .0.join(", "))]
    Ambiguous(Vec<String>),
    #[error("no job named '{}' (available: {})", .0, .1.join(", "))]
    UnknownJob(String, Vec<String>),
    #[error("job '{0}': {1}")]
    Job(String, String),
    #[error("job '{0}': {1}")]
    Invalid(String, #[source] JobConfigError),
}
