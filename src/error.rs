use thiserror::Error;

/// Errors surfaced by the communication substrate.
///
/// Any of these is fatal to the whole distributed computation: the collective
/// protocols cannot be locally recovered once a message is lost, so callers
/// propagate these upward and terminate. Malformed *local* input (unsorted
/// runs, mismatched array lengths) is a caller bug and panics instead.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("peer {rank} disconnected")]
    Disconnected { rank: usize },

    #[error("received malformed payload from rank {rank}: {reason}")]
    MalformedPayload { rank: usize, reason: &'static str },
}

/// Errors surfaced by a distributed sort run.
#[derive(Debug, Error)]
pub enum SortError {
    #[error(transparent)]
    Comm(#[from] CommError),
}
