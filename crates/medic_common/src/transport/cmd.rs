//! Transport that spawns the real adb/fastboot binaries.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{parse_device_list, render_command, with_serial, Transport};
use crate::context::CallContext;
use crate::error::TransportError;

/// How long to keep draining pipes after the process is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Per-command ceilings; the caller's deadline may cut them shorter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    /// `adb devices` / `fastboot devices`
    pub list: Duration,
    pub adb: Duration,
    pub fastboot: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(6),
            adb: Duration::from_secs(20),
            fastboot: Duration::from_secs(30),
        }
    }
}

/// Shells out to `adb` and `fastboot`
#[derive(Debug, Clone)]
pub struct CmdTransport {
    adb_path: String,
    fastboot_path: String,
    timeouts: TransportTimeouts,
}

impl Default for CmdTransport {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl CmdTransport {
    /// Empty paths fall back to `adb` / `fastboot` on `$PATH`
    pub fn new(adb_path: impl Into<String>, fastboot_path: impl Into<String>) -> Self {
        let adb_path = adb_path.into();
        let fastboot_path = fastboot_path.into();
        Self {
            adb_path: if adb_path.is_empty() { "adb".to_string() } else { adb_path },
            fastboot_path: if fastboot_path.is_empty() {
                "fastboot".to_string()
            } else {
                fastboot_path
            },
            timeouts: TransportTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TransportTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn adb_path(&self) -> &str {
        &self.adb_path
    }

    pub fn fastboot_path(&self) -> &str {
        &self.fastboot_path
    }

    pub fn timeouts(&self) -> TransportTimeouts {
        self.timeouts
    }

    /// Run one command with `timeout` bounded by the caller's deadline.
    async fn run(
        &self,
        ctx: &CallContext,
        timeout: Duration,
        bin: &str,
        args: &[String],
    ) -> Result<String, TransportError> {
        let command = render_command(bin, args);
        if ctx.is_cancelled() {
            return Err(TransportError::Cancelled { command });
        }

        let call = ctx.child(Some(timeout));
        let limit = call.remaining().unwrap_or(timeout);
        debug!(%command, limit_ms = limit.as_millis() as u64, "running device command");

        let mut child = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, Arc::clone(&stdout_buf)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, Arc::clone(&stderr_buf)));
        }

        let waited = tokio::select! {
            res = tokio::time::timeout(limit, child.wait()) => Some(res),
            _ = call.cancelled() => None,
        };

        let status = match waited {
            Some(Ok(Ok(status))) => Ok(status),
            Some(Ok(Err(source))) => Err(TransportError::Spawn {
                command: command.clone(),
                source,
            }),
            Some(Err(_elapsed)) => {
                kill(&mut child, &command).await;
                Err(TransportError::Timeout {
                    command: command.clone(),
                    after: limit,
                    output: String::new(),
                })
            }
            None => {
                kill(&mut child, &command).await;
                for reader in &readers {
                    reader.abort();
                }
                return Err(TransportError::Cancelled { command });
            }
        };

        drain(readers).await;
        let output = combined_output(&stdout_buf, &stderr_buf);

        match status {
            Ok(status) if status.success() => Ok(output),
            Ok(status) => Err(TransportError::Failed {
                command,
                status: status.to_string(),
                output,
            }),
            Err(TransportError::Timeout { command, after, .. }) => {
                Err(TransportError::Timeout {
                    command,
                    after,
                    output,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Transport for CmdTransport {
    async fn list_devices(&self, ctx: &CallContext) -> Result<Vec<String>, TransportError> {
        let mut serials = BTreeSet::new();
        let mut cancelled = None;

        for bin in [&self.adb_path, &self.fastboot_path] {
            match self
                .run(ctx, self.timeouts.list, bin, &["devices".to_string()])
                .await
            {
                Ok(out) => serials.extend(parse_device_list(&out)),
                Err(e) if e.is_cancelled() => cancelled = Some(e),
                Err(e) => debug!("{} devices failed: {}", bin, e),
            }
        }

        if serials.is_empty() {
            return Err(cancelled.unwrap_or(TransportError::NoDevices));
        }
        Ok(serials.into_iter().collect())
    }

    async fn adb(
        &self,
        ctx: &CallContext,
        serial: &str,
        args: &[&str],
    ) -> Result<String, TransportError> {
        let full = with_serial(serial, args);
        self.run(ctx, self.timeouts.adb, &self.adb_path, &full).await
    }

    async fn fastboot(
        &self,
        ctx: &CallContext,
        serial: &str,
        args: &[&str],
    ) -> Result<String, TransportError> {
        let full = with_serial(serial, args);
        self.run(ctx, self.timeouts.fastboot, &self.fastboot_path, &full)
            .await
    }
}

/// Copy a pipe into a shared buffer chunk by chunk, so whatever arrived before
/// a timeout is still available.
fn spawn_reader<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    })
}

/// Wait briefly for readers to hit EOF. A forked adb server can hold the pipes
/// open indefinitely, so stragglers are aborted.
async fn drain(mut readers: Vec<JoinHandle<()>>) {
    let joined = tokio::time::timeout(DRAIN_GRACE, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await;
    if joined.is_err() {
        for reader in &readers {
            reader.abort();
        }
    }
}

async fn kill(child: &mut tokio::process::Child, command: &str) {
    if let Err(e) = child.start_kill() {
        warn!("failed to kill {}: {}", command, e);
        return;
    }
    let _ = tokio::time::timeout(DRAIN_GRACE, child.wait()).await;
}

fn combined_output(stdout: &Mutex<Vec<u8>>, stderr: &Mutex<Vec<u8>>) -> String {
    let mut out = String::from_utf8_lossy(&stdout.lock().unwrap_or_else(PoisonError::into_inner))
        .into_owned();
    out.push_str(&String::from_utf8_lossy(
        &stderr.lock().unwrap_or_else(PoisonError::into_inner),
    ));
    out
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh_transport() -> CmdTransport {
        CmdTransport::new("sh", "sh")
    }

    #[test]
    fn test_default_paths() {
        let t = CmdTransport::default();
        assert_eq!(t.adb_path(), "adb");
        assert_eq!(t.fastboot_path(), "fastboot");
        assert_eq!(t.timeouts().adb, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_run_captures_stdout_and_stderr() {
        let t = sh_transport();
        let out = t
            .adb(&CallContext::new(), "", &["-c", "echo out; echo err 1>&2"])
            .await
            .unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[tokio::test]
    async fn test_failure_keeps_output() {
        let t = sh_transport();
        let err = t
            .adb(&CallContext::new(), "", &["-c", "echo device offline; exit 3"])
            .await
            .unwrap_err();
        match &err {
            TransportError::Failed { status, output, .. } => {
                assert!(status.contains('3'));
                assert!(output.contains("device offline"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported_with_partial_output() {
        let t = sh_transport().with_timeouts(TransportTimeouts {
            list: Duration::from_secs(1),
            adb: Duration::from_millis(200),
            fastboot: Duration::from_secs(1),
        });
        let err = t
            .adb(&CallContext::new(), "", &["-c", "echo started; sleep 5"])
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err:?}");
        assert!(err.output().contains("started"));
    }

    #[tokio::test]
    async fn test_caller_deadline_cuts_command_timeout() {
        let t = sh_transport();
        let ctx = CallContext::with_timeout(Duration::from_millis(150));
        let err = t
            .adb(&ctx, "", &["-c", "sleep 5"])
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_cancelled_context_never_spawns() {
        let t = CmdTransport::new("/nonexistent/adb", "/nonexistent/fastboot");
        let ctx = CallContext::new();
        ctx.cancel();
        let err = t.adb(&ctx, "abc", &["reboot"]).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_during_run() {
        let t = sh_transport();
        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let err = t.adb(&ctx, "", &["-c", "sleep 5"]).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let t = CmdTransport::new("/nonexistent/adb", "/nonexistent/fastboot");
        let err = t.adb(&CallContext::new(), "", &["devices"]).await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_list_devices_without_tools_is_no_devices() {
        let t = CmdTransport::new("/nonexistent/adb", "/nonexistent/fastboot");
        let err = t.list_devices(&CallContext::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::NoDevices));
    }
}
