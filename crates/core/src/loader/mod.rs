//! Incremental, retrying acquisition of collections, extended info and plays.

/// The load orchestrator.
pub mod orchestrator;
/// Loading-status entries.
pub mod status;

pub use orchestrator::CollectionLoader;
pub use status::{LoadingKind, LoadingStatus, RetryDiagnostics};

/// Split `input` into consecutive chunks of at most `chunk_size` items.
///
/// The final chunk carries the remainder.
pub(crate) fn chunk<T: Clone>(input: &[T], chunk_size: usize) -> Vec<Vec<T>> {
    input
        .chunks(chunk_size.max(1))
        .map(|part| part.to_vec())
        .collect()
}
