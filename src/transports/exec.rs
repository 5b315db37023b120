//! `exec:` and `shell`/`system:` - dial by spawning a subprocess and piping
//! its stdin/stdout as the [`crate::stream::Stream`].
//!
//! `cmd` is split on spaces for argv (`exec`), or handed whole to
//! `$SHELL -c`/`sh -c` (`shell`/`system`). `close` kills the child and waits
//! for it, ignoring a non-zero exit caused by the kill itself.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use pin_project::pin_project;
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::descriptor::{Capability, Descriptor, Dialer, StringOption};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::stream::BoxStream;

const CMD_OPTION: StringOption = StringOption {
    name: "cmd",
    description: "the command line to run",
    default: "",
};

struct ExecDialer {
    /// When true, run `cmd` via `$SHELL -c`/`sh -c` instead of splitting on
    /// spaces (the `shell`/`system` schemes).
    via_shell: bool,
}

#[async_trait]
impl Dialer for ExecDialer {
    async fn dial(&self, endpoint: &Endpoint) -> Result<BoxStream> {
        let cmd = endpoint.get_string_option("cmd");
        if cmd.is_empty() {
            return Err(Error::InvalidOption("exec: cmd must not be empty".into()));
        }

        let mut command = if self.via_shell {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
            let mut c = Command::new(shell);
            c.arg("-c").arg(&cmd);
            c
        } else {
            let mut parts = cmd.split(' ').filter(|s| !s.is_empty());
            let program = parts
                .next()
                .ok_or_else(|| Error::InvalidOption("exec: empty cmd".into()))?;
            let mut c = Command::new(program);
            c.args(parts);
            c
        };

        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped());

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        Ok(Box::new(ChildStream {
            child: Some(child),
            stdin,
            stdout,
        }))
    }
}

#[pin_project]
struct ChildStream {
    child: Option<Child>,
    #[pin]
    stdin: ChildStdin,
    #[pin]
    stdout: ChildStdout,
}

impl AsyncRead for ChildStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().stdout.poll_read(cx, buf)
    }
}

impl AsyncWrite for ChildStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().stdin.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stdin.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if let Some(mut child) = this.child.take() {
            // start_kill is synchronous and best-effort; a child that has
            // already exited returns an error here, which we ignore - the
            // point is to reap it, not to require the kill to have "worked".
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "exec: start_kill failed, child likely already exited");
            }
            // Reap in the background so shutdown doesn't block on process
            // exit; a non-zero status caused by the kill itself is expected
            // and ignored.
            tokio::spawn(async move {
                if let Err(e) = child.wait().await {
                    warn!(error = %e, "exec: wait after kill failed");
                }
            });
        }
        Poll::Ready(Ok(()))
    }
}

pub fn register(registry: &mut Registry) {
    registry.add(Descriptor {
        scheme: "exec",
        description: "spawn a subprocess, piping stdin/stdout as the stream",
        examples: &["exec:cat", "exec:?cmd=cat%20-n"],
        string_options: &[CMD_OPTION],
        bool_options: &[],
        int_options: &[],
        supports_multiple: true,
        supports_streams: false,
        capability: Capability::Dial(Arc::new(ExecDialer { via_shell: false })),
    });
    for scheme in ["shell", "system"] {
        registry.add(Descriptor {
            scheme,
            description: "spawn `$SHELL -c cmd` (falls back to `sh`), piping stdin/stdout",
            examples: &["shell:?cmd=echo%20hi%20%7C%20wc%20-l"],
            string_options: &[CMD_OPTION],
            bool_options: &[],
            int_options: &[],
            supports_multiple: true,
            supports_streams: false,
            capability: Capability::Dial(Arc::new(ExecDialer { via_shell: true })),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::build_registry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn exec_cat_echoes_stdin() {
        let registry = build_registry();
        let endpoint = registry
            .find_and_bind("exec:?cmd=cat")
            .expect("parse exec endpoint");
        let mut stream = endpoint.connect().await.expect("spawn cat");

        stream.write_all(b"hello").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn shell_scheme_runs_via_shell() {
        let registry = build_registry();
        let endpoint = registry
            .find_and_bind("shell:?cmd=echo%20hi")
            .expect("parse shell endpoint");
        let mut stream = endpoint.connect().await.expect("spawn shell");
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hi\n");
    }

    #[tokio::test]
    async fn empty_cmd_is_invalid_option() {
        let registry = build_registry();
        let endpoint = registry.find_and_bind("exec:?cmd=").unwrap();
        let err = endpoint.connect().await.unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
    }
}
