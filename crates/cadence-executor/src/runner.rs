//! `ScriptRunner`: runs job scripts as child processes with a hard timeout
//! and bounded output capture.

use crate::{
    error::{ExecError, Result},
    output::TailBuffer,
    types::{ExecResult, Termination},
};
use cadence_core::config::SchedulerConfig;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command as AsyncCommand,
    task::JoinHandle,
};
use tracing::{debug, warn};

/// How long to keep reading pipes after the child is gone. Grandchildren that
/// inherited stdout can hold the pipe open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Executes scripts from a fixed directory through a fixed interpreter.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    shell: String,
    script_dir: PathBuf,
    env: BTreeMap<String, String>,
    max_output_bytes: usize,
}

impl ScriptRunner {
    pub fn new(shell: impl Into<String>, script_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            script_dir: script_dir.into(),
            env: BTreeMap::new(),
            max_output_bytes: crate::output::DEFAULT_MAX_BYTES,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            script_dir: PathBuf::from(&config.script_dir),
            env: config.env.clone(),
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Absolute path of `script` inside the script directory.
    pub fn resolve(&self, script: &str) -> PathBuf {
        self.script_dir.join(script)
    }

    /// Run `script` and wait for it, killing its process group after `timeout`.
    ///
    /// A script that runs and exits non-zero, dies from a signal, or times
    /// out is reported through [`ExecResult::termination`], with whatever
    /// output was captured up to that point.
    ///
    /// # Errors
    ///
    /// - `ScriptNotFound`: the resolved path is not a file.
    /// - `Spawn`: the interpreter could not be started.
    /// - `IoError`: waiting on the child failed.
    pub async fn exec(&self, script: &str, timeout: Duration) -> Result<ExecResult> {
        let path = self.resolve(script);
        if !path.is_file() {
            return Err(ExecError::ScriptNotFound(path.display().to_string()));
        }
        debug!(script = %path.display(), ?timeout, "exec");

        let mut cmd = AsyncCommand::new(&self.shell);
        cmd.arg(&path)
            .envs(&self.env)
            .env("PATH", self.search_path())
            .current_dir(&self.script_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout can take down everything the script forked.
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", self.shell)))?;
        let pid = child.id();

        let sink = Arc::new(Mutex::new(TailBuffer::new(self.max_output_bytes)));
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, Arc::clone(&sink))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, Arc::clone(&sink))));
        }

        let termination = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => match status.code() {
                Some(code) => Termination::Exited(code),
                None => Termination::Signalled,
            },
            Ok(Err(e)) => {
                readers.iter().for_each(JoinHandle::abort);
                return Err(ExecError::IoError(e));
            }
            Err(_elapsed) => {
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!("kill after timeout: {e}");
                }
                Termination::TimedOut
            }
        };
        let elapsed = started.elapsed();

        for mut reader in readers {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                warn!(script = %path.display(), "output pipe still open after exit; abandoning reader");
                reader.abort();
            }
        }

        let output = sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_text();

        Ok(ExecResult {
            termination,
            output,
            elapsed,
        })
    }

    fn search_path(&self) -> String {
        let inherited = std::env::var("PATH").unwrap_or_default();
        join_path(&self.script_dir, &inherited)
    }
}

fn join_path(dir: &Path, inherited: &str) -> String {
    if inherited.is_empty() {
        dir.display().to_string()
    } else {
        format!("{}:{inherited}", dir.display())
    }
}

/// Copy everything from `reader` into the shared tail buffer until EOF.
async fn pump<R>(mut reader: R, sink: Arc<Mutex<TailBuffer>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(&chunk[..n]),
            Err(e) => {
                debug!("output pipe read failed: {e}");
                break;
            }
        }
    }
}

fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(raw_pid) = pid {
        // Safety: the child was spawned as the leader of its own group and has
        // not been reaped yet, so the group id cannot have been recycled.
        unsafe {
            libc::killpg(raw_pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
