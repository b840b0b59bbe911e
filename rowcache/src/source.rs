//! Interface to readers over persistent storage.

use crate::{fragment::Fragment, ring::PartitionRange, Error};
use std::future::Future;

/// A cursor over an immutable snapshot of persistent storage.
///
/// Readers are driven by a single scan at a time: callers must wait for each operation to
/// complete before issuing the next one.
pub trait Reader: Send + 'static {
    /// Skip the remainder of the current partition (if any).
    ///
    /// If the reader has not yet emitted the start of the current partition, this does nothing.
    fn next_partition(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Pull the next fragment, or `None` once the range is exhausted.
    fn next(&mut self) -> impl Future<Output = Result<Option<Fragment>, Error>> + Send;

    /// Whether the reader has observed the end of its range.
    fn is_end_of_stream(&self) -> bool;

    /// Whether no fragments are buffered.
    fn is_buffer_empty(&self) -> bool;

    /// Reposition the reader onto `range` without recreating it.
    ///
    /// `range` must not start before any partition the reader has already emitted.
    fn fast_forward_to(
        &mut self,
        range: PartitionRange,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Release all resources held by the reader.
    fn close(self) -> impl Future<Output = Result<(), Error>> + Send;
}
