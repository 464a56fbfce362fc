//! SSH adapter built on libssh2.

use crate::executor::{CommandOutput, RemoteExecutor, RemoteTarget};
use async_trait::async_trait;
use leasehold_cache::ResolverCache;
use leasehold_core::{Error, Result};
use ssh2::Session;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Pause between polls of an idle channel.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Password-authenticated SSH executor.
///
/// libssh2 is blocking, so each call runs on the blocking pool. Connecting is
/// bounded by the session timeout; output is drained in non-blocking mode until
/// the deadline passes or the awaiting side gives up, whichever comes first.
pub struct Ssh2Executor {
    resolver: Arc<ResolverCache>,
}

impl Ssh2Executor {
    pub fn new(resolver: Arc<ResolverCache>) -> Self {
        Self { resolver }
    }
}

fn remote(context: &str) -> impl Fn(ssh2::Error) -> Error + '_ {
    move |e| Error::RemoteExecution(format!("{context}: {e}"))
}

/// Move whatever `stream` has ready into `out`. Returns whether anything was read.
fn read_ready(stream: &mut impl Read, buf: &mut [u8], out: &mut Vec<u8>) -> Result<bool> {
    match stream.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            out.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(Error::RemoteExecution(format!("read output: {e}"))),
    }
}

/// Read stdout and stderr side by side so a full stderr pipe never stalls stdout.
///
/// Stops once `at_eof` reports the remote end closed and both streams are empty.
fn drain(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    at_eof: impl Fn() -> bool,
    deadline: Instant,
    cancelled: &AtomicBool,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let read_out = read_ready(stdout, &mut buf, &mut out)?;
        let read_err = read_ready(stderr, &mut buf, &mut err)?;
        if read_out || read_err {
            continue;
        }
        if at_eof() {
            return Ok((out, err));
        }
        if cancelled.load(Ordering::Relaxed) || Instant::now() >= deadline {
            return Err(Error::RemoteExecution(
                "timed out waiting for command output".to_string(),
            ));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn run_blocking(
    addr: SocketAddr,
    target: &RemoteTarget,
    command: &str,
    timeout: Duration,
    cancelled: &AtomicBool,
) -> Result<CommandOutput> {
    let deadline = Instant::now() + timeout;
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| Error::RemoteExecution(format!("connect to {target}: {e}")))?;

    let mut session = Session::new().map_err(remote("session"))?;
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session.handshake().map_err(remote("handshake"))?;
    session
        .userauth_password(&target.username, &target.password)
        .map_err(remote("authentication"))?;
    if !session.authenticated() {
        return Err(Error::RemoteExecution(format!(
            "authentication rejected for {target}"
        )));
    }

    let mut channel = session.channel_session().map_err(remote("channel"))?;
    channel.exec(command).map_err(remote("exec"))?;

    session.set_blocking(false);
    let drained = drain(
        &mut channel.stream(0),
        &mut channel.stderr(),
        || channel.eof(),
        deadline,
        cancelled,
    );
    session.set_blocking(true);
    let (stdout, stderr) = match drained {
        Ok(streams) => streams,
        Err(e) => {
            if let Err(close) = session.disconnect(None, "command abandoned", None) {
                debug!(target = %target, error = %close, "SSH disconnect failed");
            }
            return Err(e);
        }
    };

    channel.wait_close().map_err(remote("close"))?;
    let exit_code = channel.exit_status().map_err(remote("exit status"))?;

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

#[async_trait]
impl RemoteExecutor for Ssh2Executor {
    async fn exec(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let addr = self.resolver.resolve(&target.host, target.port).await?;
        debug!(target = %target, %addr, "Opening SSH session");

        let owned_target = target.clone();
        let command = command.to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let task = tokio::task::spawn_blocking(move || {
            run_blocking(addr, &owned_target, &command, timeout, &flag)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => {
                joined.map_err(|e| Error::Internal(format!("SSH task panicked: {e}")))?
            }
            Err(_) => {
                // The blocking task notices within one poll and drops the session.
                cancelled.store(true, Ordering::Relaxed);
                warn!(target = %target, timeout_secs = timeout.as_secs(), "SSH command timed out");
                Err(Error::RemoteExecution(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io;

    /// Serves queued chunks; `None` entries stand for "nothing ready yet".
    struct Scripted(VecDeque<Option<Vec<u8>>>);

    impl Scripted {
        fn new(chunks: Vec<Option<&str>>) -> Self {
            Self(
                chunks
                    .into_iter()
                    .map(|c| c.map(|s| s.as_bytes().to_vec()))
                    .collect(),
            )
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(io::Error::from(ErrorKind::WouldBlock)),
                None => Ok(0),
            }
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn test_drain_reads_both_streams_side_by_side() {
        let noisy = "e".repeat(4096);
        let mut stdout = Scripted::new(vec![None, Some("out-1 "), None, Some("out-2")]);
        let mut stderr = Scripted::new(vec![
            Some(noisy.as_str()),
            Some(noisy.as_str()),
            None,
            Some("!"),
        ]);
        let polls = Cell::new(0);
        let at_eof = || {
            polls.set(polls.get() + 1);
            polls.get() > 1
        };

        let (out, err) = drain(
            &mut stdout,
            &mut stderr,
            at_eof,
            far_deadline(),
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(out, b"out-1 out-2");
        assert_eq!(err.len(), 2 * 4096 + 1);
    }

    #[test]
    fn test_drain_stops_when_cancelled() {
        let mut stalled = Scripted::new(vec![None; 1000]);
        let mut quiet = Scripted::new(vec![]);
        let err = drain(
            &mut stalled,
            &mut quiet,
            || false,
            far_deadline(),
            &AtomicBool::new(true),
        )
        .unwrap_err();
        assert!(matches!(err, Error::RemoteExecution(_)));
    }

    #[test]
    fn test_drain_stops_at_deadline() {
        let mut stdout = Scripted::new(vec![]);
        let mut stderr = Scripted::new(vec![]);
        let started = Instant::now();
        let err = drain(
            &mut stdout,
            &mut stderr,
            || false,
            started + Duration::from_millis(50),
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, Error::RemoteExecution(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
