//! Subprocess execution for a training launch.

use std::{path::Path, process::Stdio};

use tokio::{
    fs::OpenOptions,
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::Command,
    task::JoinHandle,
};

use crate::{config::StdioMode, invocation::Invocation};

/// Result of a finished launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Job name.
    pub name: String,
    /// Exit code if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if killed by one.
    pub signal: Option<i32>,
}

impl LaunchOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code to propagate: the child's code, `128 + signal` when it was
    /// killed, `1` when neither is known.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }

    fn from_status(name: String, status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            name,
            code: status.code(),
            signal,
        }
    }
}

/// Spawns the external program for one invocation and waits for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Launcher;

impl Launcher {
    /// Check the filesystem before anything is spawned.
    pub fn preflight(&self, invocation: &Invocation) -> Result<(), LaunchError> {
        if let Some(ref cwd) = invocation.working_dir
            && !cwd.is_dir()
        {
            return Err(LaunchError::WorkingDir(cwd.display().to_string()));
        }

        if let Some(ref logs) = invocation.logs_dir {
            if !logs.is_dir() {
                tracing::debug!("Creating logs directory {}", logs.display());
            }
            std::fs::create_dir_all(logs)
                .map_err(|e| LaunchError::Io(logs.display().to_string(), e))?;
        }

        if invocation.stdio == StdioMode::Tee {
            std::fs::create_dir_all(&invocation.run_dir)
                .map_err(|e| LaunchError::Io(invocation.run_dir.display().to_string(), e))?;
        }

        Ok(())
    }

    /// Run the invocation to completion.
    ///
    /// A non-zero exit is not an error here; it is reported in the outcome.
    pub async fn launch(&self, invocation: &Invocation) -> Result<LaunchOutcome, LaunchError> {
        self.preflight(invocation)?;

        tracing::info!("Launching {}: {}", invocation.name, invocation);

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).envs(&invocation.env).stdin(Stdio::inherit());
        if let Some(ref cwd) = invocation.working_dir {
            cmd.current_dir(cwd);
        }
        match invocation.stdio {
            StdioMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            StdioMode::Tee => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::Spawn(invocation.program.clone(), e))?;

        if let Some(pid) = child.id() {
            tracing::debug!("{} started with PID {}", invocation.name, pid);
        }

        let timestamp = now_timestamp();
        let stdout_task = child.stdout.take().map(|out| {
            tee(
                out,
                tokio::io::stdout(),
                invocation.run_dir.join("launcher-stdout.log"),
                timestamp.clone(),
            )
        });
        let stderr_task = child.stderr.take().map(|err| {
            tee(
                err,
                tokio::io::stderr(),
                invocation.run_dir.join("launcher-stderr.log"),
                timestamp,
            )
        });

        let status = child
            .wait()
            .await
            .map_err(|e| LaunchError::Wait(invocation.name.clone(), e));

        // Drain log tasks even if waiting failed
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let _ = task.await;
        }

        let outcome = LaunchOutcome::from_status(invocation.name.clone(), status?);
        if outcome.success() {
            tracing::info!("{} finished successfully", outcome.name);
        } else {
            tracing::error!(
                "{} failed with exit code {}",
                outcome.name,
                outcome.exit_code()
            );
        }
        Ok(outcome)
    }
}

/// Copy the child's output to `forward` and append it to `path`.
///
/// Bytes are copied as read, so partial lines and non-UTF-8 output pass
/// through unchanged. The pipe is drained to EOF even when a write fails;
/// the child must never see a closed pipe.
fn tee<R, W>(mut source: R, mut forward: W, path: impl AsRef<Path>, ts: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let path = path.as_ref().to_path_buf();
    tokio::spawn(async move {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .inspect_err(|e| tracing::warn!("Cannot open {}: {}", path.display(), e))
            .ok();

        // Separate launches when the file already has content
        if let Some(ref mut f) = file
            && f.metadata().await.is_ok_and(|m| m.len() > 0)
        {
            let _ = f
                .write_all(format!("\n--- launch at {ts} ---\n\n").as_bytes())
                .await;
        }

        let mut forwarding = true;
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match source.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Reading child output failed: {}", e);
                    break;
                }
            };
            let chunk = &buf[..n];

            if forwarding
                && (forward.write_all(chunk).await.is_err() || forward.flush().await.is_err())
            {
                forwarding = false;
            }
            if let Some(ref mut f) = file
                && let Err(e) = f.write_all(chunk).await
            {
                tracing::warn!("Writing {} failed: {}", path.display(), e);
                file = None;
            }
        }
        if let Some(ref mut f) = file {
            let _ = f.flush().await;
        }
    })
}

/// Get current time as a local timestamp string.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Errors that can occur when launching the external process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("working directory {0} does not exist")]
    WorkingDir(String),
    #[error("failed to create {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("failed to wait for {0}: {1}")]
    Wait(String, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let outcome = |code, signal| LaunchOutcome {
            name: "x".into(),
            code,
            signal,
        };
        assert_eq!(outcome(Some(0), None).exit_code(), 0);
        assert!(outcome(Some(0), None).success());
        assert_eq!(outcome(Some(3), None).exit_code(), 3);
        assert_eq!(outcome(None, Some(9)).exit_code(), 137);
        assert_eq!(outcome(None, None).exit_code(), 1);
        assert!(!outcome(None, Some(15)).success());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
    }
}
