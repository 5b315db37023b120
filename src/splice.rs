//! The bidirectional splicing engine (C6).
//!
//! Built on the plain `tokio::io::copy` relay idiom: two spawned copy loops,
//! one per direction, each shutting down its destination writer on
//! completion. No per-byte encode/decode transform layer sits in between -
//! this relay has no use for one.

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::stream::BoxStream;

/// Bytes copied in each direction by a successful [`splice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounts {
    pub left_to_right: u64,
    pub right_to_left: u64,
}

/// Splice failed. Carries whichever direction(s) errored; if both did, the
/// message tags which side each error came from.
#[derive(Debug, thiserror::Error)]
pub enum SpliceError {
    #[error("left copier failed: {0}")]
    Left(#[source] io::Error),

    #[error("right copier failed: {0}")]
    Right(#[source] io::Error),

    #[error("both copiers failed; left: {left}; right: {right}")]
    Both {
        #[source]
        left: io::Error,
        right: io::Error,
    },
}

/// Splice `left` and `right` together: concurrently copy `left -> right` and
/// `right -> left` until both directions report EOF or error.
///
/// Each direction, on completion (clean or not), shuts down the
/// *destination* writer half. Many transports here (WebSocket frames, exec
/// pipes) have no true half-close, so forcing a full close is the only
/// portable way to unblock the peer copier once one side is done. The call
/// returns only once both copy tasks have finished, at which point both
/// streams are dropped (and so closed).
pub async fn splice(left: BoxStream, right: BoxStream) -> Result<ByteCounts, SpliceError> {
    let (mut left_r, mut left_w) = tokio::io::split(left);
    let (mut right_r, mut right_w) = tokio::io::split(right);

    let l_to_r = copy_and_shutdown(&mut left_r, &mut right_w);
    let r_to_l = copy_and_shutdown(&mut right_r, &mut left_w);

    let (l_to_r, r_to_l) = tokio::join!(l_to_r, r_to_l);

    // both split halves drop here, closing both underlying transports
    // regardless of which direction(s) errored.
    match (l_to_r, r_to_l) {
        (Ok(ltr), Ok(rtl)) => Ok(ByteCounts {
            left_to_right: ltr,
            right_to_left: rtl,
        }),
        (Err(l), Err(r)) => Err(SpliceError::Both { left: l, right: r }),
        (Err(l), Ok(_)) => Err(SpliceError::Left(l)),
        (Ok(_), Err(r)) => Err(SpliceError::Right(r)),
    }
}

async fn copy_and_shutdown<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = io::copy(reader, writer).await;
    // Best-effort: a shutdown failure doesn't change the outcome of the
    // copy that already happened.
    let _ = writer.shutdown().await;
    result
}
