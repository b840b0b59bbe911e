//! Interface to the row cache that owns the phases scans are reconciled against.

use crate::{
    query::Params,
    ring::{PartitionRange, RingPosition},
    source::Reader,
    Error,
};
use commonware_runtime::Metrics;
use prometheus_client::metrics::counter::Counter;
use std::future::Future;

/// Generation of the cache's picture of underlying storage.
///
/// Phases never decrease. A phase is bumped whenever the cache starts to reflect a new snapshot
/// of storage (for example after a flush or an invalidation).
pub type Phase = u64;

/// The cache side of a scan.
///
/// Implementations must return consistent answers to concurrent scans: once a phase has been
/// observed via [Cache::phase_of], [Cache::snapshot_for_phase] must keep returning the same
/// snapshot for it for as long as any reader bound to that phase is alive.
pub trait Cache: Send + Sync {
    /// Immutable view of storage valid for exactly one phase.
    type Snapshot: Clone + Send + Sync + 'static;

    /// Reader over a [Cache::Snapshot].
    type Reader: Reader;

    /// Phase responsible for populating the cache at `position`.
    fn phase_of(&self, position: &RingPosition) -> Phase;

    /// Snapshot of storage corresponding to `phase`.
    fn snapshot_for_phase(&self, phase: Phase) -> Self::Snapshot;

    /// Snapshot and phase responsible for `position`.
    fn snapshot_of(&self, position: &RingPosition) -> (Self::Snapshot, Phase) {
        let phase = self.phase_of(position);
        (self.snapshot_for_phase(phase), phase)
    }

    /// Create a reader over `range` of `snapshot` on behalf of the scan described by `params`.
    fn create_underlying_reader(
        &self,
        params: &Params,
        snapshot: &Self::Snapshot,
        range: &PartitionRange,
    ) -> impl Future<Output = Result<Self::Reader, Error>> + Send;

    /// Counters updated by scans over this cache.
    fn stats(&self) -> &Stats;
}

/// Counters describing how scans interacted with underlying storage.
#[derive(Clone, Default)]
pub struct Stats {
    pub reads: Counter,
    pub reads_done: Counter,
    pub reads_with_misses: Counter,
    pub reads_with_no_misses: Counter,
    pub underlying_recreations: Counter,
    pub underlying_partition_skips: Counter,
}

impl Stats {
    /// Create counters and register them with `context`.
    pub fn init(context: &impl Metrics) -> Self {
        let stats = Self::default();
        context.register("reads", "Number of scans started", stats.reads.clone());
        context.register(
            "reads_done",
            "Number of scans completed",
            stats.reads_done.clone(),
        );
        context.register(
            "reads_with_misses",
            "Number of scans that had to read from underlying storage",
            stats.reads_with_misses.clone(),
        );
        context.register(
            "reads_with_no_misses",
            "Number of scans served without reading from underlying storage",
            stats.reads_with_no_misses.clone(),
        );
        context.register(
            "underlying_recreations",
            "Number of underlying readers recreated after a phase change",
            stats.underlying_recreations.clone(),
        );
        context.register(
            "underlying_partition_skips",
            "Number of underlying readers fast-forwarded in place",
            stats.underlying_partition_skips.clone(),
        );
        stats
    }
}
