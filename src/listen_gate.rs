//! Shared `{Idle, Listening, Closed}` state machine reused by every
//! listener-style transport plugin.
//!
//! Centralizing this avoids re-deriving the same three invariants (`listen`
//! while Listening is `ProxyBusy`, `accept` while Idle is `NotInitialized`,
//! `close` must unblock a pending `accept`) in each of `tcp-listen`,
//! `unix-listen`, `unixpacket-listen`, `ws-listen`, and `quic-listen`. `accept`
//! races a `tokio::sync::watch` closed-signal so a pending accept unblocks
//! with a defined error the instant the listener is closed, rather than
//! hanging if nothing else ever wakes it.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::error::{Error, Result};

pub struct ListenGate {
    listening: AtomicBool,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl ListenGate {
    pub fn new() -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        ListenGate {
            listening: AtomicBool::new(false),
            closed_tx,
            closed_rx,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Transition Idle -> Listening. Returns `ProxyBusy` if already
    /// Listening.
    pub fn begin_listen(&self) -> Result<()> {
        if self
            .listening
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ProxyBusy);
        }
        Ok(())
    }

    /// `NotInitialized` if `accept` is attempted before `listen`.
    pub fn ensure_listening(&self) -> Result<()> {
        if !self.is_listening() {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// Race an in-flight accept future against the close signal, so a
    /// pending `accept` unblocks with `NotInitialized` instead of hanging
    /// forever when the listener is closed out from under it.
    pub async fn race_accept<T>(
        &self,
        accept: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        self.ensure_listening()?;
        let mut closed_rx = self.closed_rx.clone();
        tokio::select! {
            biased;
            _ = closed_rx.changed() => Err(Error::NotInitialized),
            result = accept => result,
        }
    }

    pub async fn close(&self) {
        self.listening.store(false, Ordering::Release);
        let _ = self.closed_tx.send(true);
    }
}

impl Default for ListenGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn double_listen_is_busy() {
        let gate = ListenGate::new();
        gate.begin_listen().unwrap();
        assert!(matches!(gate.begin_listen(), Err(Error::ProxyBusy)));
    }

    #[tokio::test]
    async fn accept_before_listen_is_not_initialized() {
        let gate = ListenGate::new();
        let result = gate.race_accept(async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn close_unblocks_pending_accept() {
        let gate = std::sync::Arc::new(ListenGate::new());
        gate.begin_listen().unwrap();

        let g = gate.clone();
        let accept = tokio::spawn(async move {
            g.race_accept(futures::future::pending::<Result<()>>()).await
        });

        // give the task a chance to start waiting
        tokio::task::yield_now().await;
        gate.close().await;

        let result = accept.await.unwrap();
        assert!(matches!(result, Err(Error::NotInitialized)));
    }
}
