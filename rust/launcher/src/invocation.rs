//! The external command line built from launcher settings and a job.

use std::{collections::BTreeMap, path::PathBuf};

use sparo_config::JobConfig;

use crate::config::{LauncherSettings, StdioMode};

/// A fully resolved external command. Built once, launched once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Job name, for logging.
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Directory created before the spawn, if any.
    pub logs_dir: Option<PathBuf>,
    pub stdio: StdioMode,
    /// Where tee mode writes the child's output.
    pub run_dir: PathBuf,
}

impl Invocation {
    /// Build the command: launcher topology args, entry module, then the job's own args.
    #[must_use]
    pub fn new(settings: &LauncherSettings, job: &JobConfig) -> Self {
        let mut args = job.launcher_args();
        if let Some(module) = settings
            .entry_module
            .as_deref()
            .filter(|m| !m.trim().is_empty())
        {
            args.extend(["-m".to_string(), module.to_string()]);
        }
        args.extend(job.to_cli_args());

        let working_dir = settings.working_dir.as_ref().map(PathBuf::from);
        // The child resolves relative paths against its own cwd.
        let resolve = |p: PathBuf| match working_dir {
            Some(ref cwd) if p.is_relative() => cwd.join(p),
            _ => p,
        };

        Self {
            name: job.name.clone(),
            program: settings.program.clone(),
            args,
            env: settings.env.clone(),
            logs_dir: settings
                .create_logs_dir
                .then(|| resolve(PathBuf::from(&job.logs))),
            run_dir: resolve(job.run_dir()),
            working_dir,
            stdio: settings.stdio,
        }
    }

    /// Replace the program, keeping every argument.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Program followed by its arguments.
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

/// Quote a token for a POSIX shell, leaving plain tokens bare.
#[must_use]
pub fn shell_quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// Renders as a copy-pasteable shell command, env assignments first.
impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref cwd) = self.working_dir {
            write!(f, "cd {} && ", shell_quote(&cwd.display().to_string()))?;
        }
        for (k, v) in &self.env {
            write!(f, "{k}={} ", shell_quote(v))?;
        }
        let argv: Vec<String> = self.argv().into_iter().map(shell_quote).collect();
        write!(f, "{}", argv.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobConfig {
        toml::from_str(
            r#"
name = "e2e"
nproc_per_node = 1
train_data = "data/{00000..00001}.tar"
train_num_samples = 100
logs = "logs"
dataset_type = "webdataset"
imagenet_val = "val"
warmup = 0
batch_size = 4
wd = 0.1
epochs = 1
workers = 0
accum_freq = 1
model = "ViT-B-16"
precision = "fp32"
seed = 0
override_model_config = '{"use_codebook":true}'
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_argument_order() {
        let inv = Invocation::new(&LauncherSettings::default(), &job());
        assert_eq!(inv.program, "torchrun");
        assert_eq!(
            &inv.args[..4],
            ["--nproc_per_node", "1", "-m", "training.main"]
        );
        assert_eq!(&inv.args[4..], job().to_cli_args().as_slice());
    }

    #[test]
    fn test_empty_entry_module_skipped() {
        let settings = LauncherSettings {
            program: "python".into(),
            entry_module: Some(String::new()),
            ..Default::default()
        };
        let inv = Invocation::new(&settings, &job());
        assert!(!inv.args.contains(&"-m".to_string()));
    }

    #[test]
    fn test_paths_resolved_against_working_dir() {
        let settings = LauncherSettings {
            working_dir: Some("src".into()),
            ..Default::default()
        };
        let inv = Invocation::new(&settings, &job());
        assert_eq!(inv.logs_dir, Some(PathBuf::from("src/logs")));
        assert_eq!(inv.run_dir, PathBuf::from("src/logs/e2e"));

        let settings = LauncherSettings {
            create_logs_dir: false,
            ..Default::default()
        };
        let inv = Invocation::new(&settings, &job());
        assert_eq!(inv.logs_dir, None);
        assert_eq!(inv.run_dir, PathBuf::from("logs/e2e"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("--batch-size"), "--batch-size");
        assert_eq!(shell_quote("data/{00000..00001}.tar"), "'data/{00000..00001}.tar'");
        assert_eq!(shell_quote(r#"{"use_codebook":true}"#), r#"'{"use_codebook":true}'"#);
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_display() {
        let mut settings = LauncherSettings::default();
        settings.env.insert("PYTHONPATH".into(), ".".into());
        let rendered = Invocation::new(&settings, &job()).to_string();
        assert!(rendered.starts_with("PYTHONPATH=. torchrun --nproc_per_node 1 -m training.main "));
        assert!(rendered.ends_with(r#"--override-model-config '{"use_codebook":true}'"#));
    }
}
