use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::report::report_file_name;

/// Raw scanner text plus wall-clock time from spawn to exit.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub raw: String,
    pub duration: Duration,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to spawn scanner: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("scanner exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("scan timed out after {0:?}")]
    TimedOut(Duration),
    #[error("scan cancelled")]
    Cancelled,
    #[error("failed to read scanner output {path}: {source}")]
    ReadOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Something that can scan one target and hand back its text report.
#[async_trait]
pub trait ScanTool: Send + Sync {
    async fn run(&self, target: &str, cancel: CancellationToken) -> Result<ScanOutput, ScanError>;
}

/// Runs `nmap --script vuln` as a child process, one output file per invocation.
#[derive(Debug, Clone)]
pub struct NmapExecutor {
    binary: PathBuf,
    work_dir: PathBuf,
    timeout: Duration,
    permits: Arc<Semaphore>,
    sequence: Arc<AtomicU64>,
}

impl NmapExecutor {
    pub fn new(
        binary: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.clamp(1, 64))),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arguments for one invocation; `-6` is added for IPv6 literals only.
    pub fn args(target: &str, output: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        if matches!(target.parse::<IpAddr>(), Ok(IpAddr::V6(_))) {
            args.push("-6".to_string());
        }
        args.extend([
            "--script".to_string(),
            "vuln".to_string(),
            "-oN".to_string(),
            output.display().to_string(),
            target.to_string(),
        ]);
        args
    }

    /// Output file for one invocation. The sequence number keeps same-address,
    /// same-millisecond scans apart.
    fn output_path(&self, target: &str) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = report_file_name(target, OffsetDateTime::now_utc())
            .replace("_report.html", &format!("_{seq}.nmap"));
        self.work_dir.join(name)
    }
}

#[async_trait]
impl ScanTool for NmapExecutor {
    async fn run(&self, target: &str, cancel: CancellationToken) -> Result<ScanOutput, ScanError> {
        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit.map_err(|_| ScanError::Cancelled)?,
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        };

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(ScanError::Spawn)?;
        let output_path = self.output_path(target);

        info!(address = target, binary = %self.binary.display(), "starting vulnerability scan");
        let start = Instant::now();
        let child = Command::new(&self.binary)
            .args(Self::args(target, &output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ScanError::Spawn)?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            res = child.wait_with_output() => res.map_err(ScanError::Spawn)?,
            _ = tokio::time::sleep(self.timeout) => {
                let _ = tokio::fs::remove_file(&output_path).await;
                return Err(ScanError::TimedOut(self.timeout));
            }
            _ = cancel.cancelled() => {
                let _ = tokio::fs::remove_file(&output_path).await;
                return Err(ScanError::Cancelled);
            }
        };
        let duration = start.elapsed();

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let _ = tokio::fs::remove_file(&output_path).await;
            return Err(ScanError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            warn!(address = target, %stderr, "scanner wrote diagnostics");
        }

        let raw = tokio::fs::read_to_string(&output_path)
            .await
            .map_err(|source| ScanError::ReadOutput {
                path: output_path.clone(),
                source,
            })?;
        let _ = tokio::fs::remove_file(&output_path).await;

        info!(address = target, secs = %format!("{:.2}", duration.as_secs_f64()), "scan finished");
        Ok(ScanOutput { raw, duration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that spawn children hold this so no fork inherits a script still open for writing.
    static SPAWN_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    /// Write an executable stand-in for nmap. `$out` is the `-oN` path.
    #[cfg(unix)]
    fn fake_nmap(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-nmap.sh");
        let script = format!(
            "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-oN\" ]; then out=\"$2\"; fi\n  shift\ndone\n{body}\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn leftover_outputs(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "nmap"))
            .count()
    }

    #[test]
    fn ipv6_targets_get_dash_six() {
        let out = Path::new("out.nmap");
        assert_eq!(
            NmapExecutor::args("1.2.3.4", out),
            vec!["--script", "vuln", "-oN", "out.nmap", "1.2.3.4"]
        );
        assert_eq!(NmapExecutor::args("2001:db8::1", out)[0], "-6");
    }

    #[test]
    fn output_paths_differ_for_the_same_address() {
        let exec = NmapExecutor::new("nmap", "work", Duration::from_secs(5), 1);
        let a = exec.output_path("1.2.3.4");
        let b = exec.output_path("1.2.3.4");
        assert_ne!(a, b);
        assert!(a.starts_with("work"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let _guard = SPAWN_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let exec = NmapExecutor::new(
            dir.path().join("no-such-nmap"),
            dir.path(),
            Duration::from_secs(5),
            1,
        );
        let err = exec.run("127.0.0.1", CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::Spawn(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let exec = NmapExecutor::new("nmap", dir.path(), Duration::from_secs(5), 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Hold the only permit so the scan can only resolve through cancellation.
        let _permit = exec.permits.clone().acquire_owned().await.unwrap();
        let err = exec.run("127.0.0.1", cancel).await.unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_returns_output_and_cleans_up() {
        let _guard = SPAWN_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let bin = fake_nmap(dir.path(), "sleep 0.1\nprintf '22/tcp open ssh\\n' > \"$out\"");
        let exec = NmapExecutor::new(bin, &work, Duration::from_secs(10), 2);

        let out = exec.run("1.2.3.4", CancellationToken::new()).await.unwrap();
        assert_eq!(out.raw, "22/tcp open ssh\n");
        assert!(out.duration >= Duration::from_millis(100));
        assert_eq!(leftover_outputs(&work), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_on_success_does_not_fail() {
        let _guard = SPAWN_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_nmap(
            dir.path(),
            "echo 'WARNING: No targets were specified' >&2\nprintf 'Nmap done\\n' > \"$out\"",
        );
        let exec = NmapExecutor::new(bin, dir.path().join("work"), Duration::from_secs(10), 1);

        let out = exec.run("1.2.3.4", CancellationToken::new()).await.unwrap();
        assert_eq!(out.raw, "Nmap done\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_failed_with_stderr() {
        let _guard = SPAWN_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_nmap(dir.path(), "echo 'Failed to resolve target' >&2\nexit 3");
        let exec = NmapExecutor::new(bin, dir.path().join("work"), Duration::from_secs(10), 1);

        match exec.run("1.2.3.4", CancellationToken::new()).await {
            Err(ScanError::Failed { stderr, .. }) => assert_eq!(stderr, "Failed to resolve target"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_the_scanner() {
        let _guard = SPAWN_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let bin = fake_nmap(
            dir.path(),
            &format!("sleep 1\ntouch '{}'", marker.display()),
        );
        let exec = NmapExecutor::new(bin, dir.path().join("work"), Duration::from_millis(200), 1);

        let started = Instant::now();
        let err = exec.run("1.2.3.4", CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_scans_of_one_address_keep_separate_outputs() {
        let _guard = SPAWN_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let bin = fake_nmap(dir.path(), "echo \"$out\" > \"$out\"\nsleep 0.3");
        let exec = NmapExecutor::new(bin, &work, Duration::from_secs(10), 4);

        for _ in 0..5 {
            let (a, b) = tokio::join!(
                exec.run("1.2.3.4", CancellationToken::new()),
                exec.run("1.2.3.4", CancellationToken::new())
            );
            let (a, b) = (a.unwrap(), b.unwrap());
            assert_ne!(a.raw, b.raw);
        }
        assert_eq!(leftover_outputs(&work), 0);
    }
}
