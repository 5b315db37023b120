//! The loop driver (C7): single / loop / parallel splicing sessions, and
//! Ctrl-C handling.
//!
//! Cancellation runs on a `tokio_util::sync::CancellationToken` raced against
//! each connect/splice step via `tokio::select!`.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::splice::{self, ByteCounts};

/// How many times the driver should splice before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Connect both sides once, splice once, return.
    Single,
    /// Repeat connect+splice in series, forever (until Ctrl-C or a fatal
    /// connect error).
    Loop,
    /// Accept pairs repeatedly, spawning an independent splicer per pair.
    /// Requires both endpoints to report `supports_multiple`.
    Parallel,
}

/// Process exit code convention used by `main.rs`: `128 + SIGINT` (134 on
/// Unix) when interrupted mid-splice, matching POSIX shell conventions.
pub const SIGINT_EXIT_CODE: i32 = 128 + 2;

/// Run `left`/`right` through `mode`, honoring `cancel` for Ctrl-C.
///
/// Returns `Ok(Some(code))` when the driver should exit with `code` (a
/// Ctrl-C interruption); `Ok(None)` on clean completion (single/loop modes
/// finishing normally, or parallel mode being cancelled after spawning).
pub async fn run(
    left: Endpoint,
    right: Endpoint,
    mode: Mode,
    cancel: CancellationToken,
) -> Result<Option<i32>> {
    match mode {
        Mode::Single => {
            run_one(&left, &right, &cancel).await?;
            Ok(None)
        }
        Mode::Loop => run_loop(&left, &right, &cancel).await,
        Mode::Parallel => run_parallel(left, right, cancel).await,
    }
}

async fn run_one(
    left: &Endpoint,
    right: &Endpoint,
    cancel: &CancellationToken,
) -> Result<Option<i32>> {
    let (l_stream, r_stream) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(Some(SIGINT_EXIT_CODE)),
        result = connect_both(left, right) => result?,
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            left.close_listener().await.ok();
            right.close_listener().await.ok();
            Ok(Some(SIGINT_EXIT_CODE))
        }
        result = splice::splice(l_stream, r_stream) => {
            log_splice_result(&result);
            Ok(None)
        }
    }
}

async fn connect_both(
    left: &Endpoint,
    right: &Endpoint,
) -> Result<(crate::stream::BoxStream, crate::stream::BoxStream)> {
    let l = left.connect().await?;
    let r = right.connect().await?;
    Ok((l, r))
}

async fn run_loop(
    left: &Endpoint,
    right: &Endpoint,
    cancel: &CancellationToken,
) -> Result<Option<i32>> {
    loop {
        if cancel.is_cancelled() {
            return Ok(Some(SIGINT_EXIT_CODE));
        }
        match run_one(left, right, cancel).await {
            Ok(Some(code)) => return Ok(Some(code)),
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "connect failed, ending loop");
                return Err(e);
            }
        }
    }
}

async fn run_parallel(
    left: Endpoint,
    right: Endpoint,
    cancel: CancellationToken,
) -> Result<Option<i32>> {
    if !left.supports_multiple() || !right.supports_multiple() {
        return Err(crate::error::Error::NotSupported(format!(
            "--parallel requires both endpoints to support multiple connections \
             ({} supports_multiple={}, {} supports_multiple={})",
            left.scheme(),
            left.supports_multiple(),
            right.scheme(),
            right.supports_multiple()
        )));
    }

    let mut tasks = tokio::task::JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                left.close_listener().await.ok();
                right.close_listener().await.ok();
                break;
            }
            result = connect_both(&left, &right) => {
                match result {
                    Ok((l_stream, r_stream)) => {
                        let cancel = cancel.clone();
                        tasks.spawn(async move {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {}
                                result = splice::splice(l_stream, r_stream) => {
                                    log_splice_result(&result);
                                }
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed in parallel mode, retrying");
                    }
                }
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    warn!(error = %e, "spliced session task panicked");
                }
            }
        }
    }

    while tasks.join_next().await.is_some() {}
    Ok(Some(SIGINT_EXIT_CODE))
}

fn log_splice_result(result: &std::result::Result<ByteCounts, splice::SpliceError>) {
    match result {
        Ok(counts) => info!(
            left_to_right = counts.left_to_right,
            right_to_left = counts.right_to_left,
            "splice finished"
        ),
        Err(e) => debug!(error = %e, "splice ended with error"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn parallel_rejects_non_multiple_endpoints() {
        let registry = crate::registry::build_registry();
        let left = registry.find_and_bind("tcp://127.0.0.1:0").unwrap();
        let right = registry.find_and_bind("tcp://127.0.0.1:0").unwrap();
        let err = run(left, right, Mode::Parallel, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::NotSupported(_)));
    }
}
