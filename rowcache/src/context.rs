//! State shared by all steps of a single scan over the cache.

use crate::{
    autoupdating::AutoupdatingReader,
    cache::{Cache, Phase},
    query::{Forwarding, Params, Permit, Priority, Schema, Slice},
    ring::{DecoratedKey, PartitionRange},
    Error,
};
use commonware_runtime::{Metrics, Spawner};
use std::sync::Arc;
use tracing::{debug, Instrument, Span};

/// Configuration for a [ReadContext].
#[derive(Clone)]
pub struct Config {
    /// The range of partitions requested by the scan.
    pub range: PartitionRange,

    /// The part of each partition requested by the scan.
    pub slice: Slice,

    /// The I/O class the scan is accounted against.
    pub priority: Priority,

    /// The span every storage access of the scan is recorded under.
    pub trace: Span,

    /// Whether readers created for the scan may be fast-forwarded.
    pub forwarding: Forwarding,
}

/// How the scan is entering a partition that must be read from underlying storage.
#[derive(Clone, Debug)]
pub enum Entry<S> {
    /// The partition may or may not exist in `snapshot` and must be probed.
    Probe {
        key: DecoratedKey,
        snapshot: S,
        phase: Phase,
    },

    /// The partition is known to exist and the underlying reader is already positioned in it.
    Present { key: DecoratedKey, phase: Phase },
}

impl<S> Entry<S> {
    pub fn key(&self) -> &DecoratedKey {
        match self {
            Self::Probe { key, .. } | Self::Present { key, .. } => key,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Probe { phase, .. } | Self::Present { phase, .. } => *phase,
        }
    }
}

/// Per-scan state: the parameters of the scan, the reader over underlying storage it falls back
/// to, and the partition currently being handed from the cache to that reader.
pub struct ReadContext<'a, E: Spawner + Metrics, C: Cache> {
    cache: &'a C,
    params: Arc<Params>,
    underlying: AutoupdatingReader<'a, E, C>,

    entry: Option<Entry<C::Snapshot>>,
    partition_exists: bool,
}

impl<'a, E: Spawner + Metrics, C: Cache> ReadContext<'a, E, C> {
    pub fn new(context: E, cache: &'a C, schema: Arc<Schema>, permit: Permit, cfg: Config) -> Self {
        let params = Arc::new(Params::new(
            schema,
            permit,
            cfg.range,
            cfg.slice,
            cfg.priority,
            cfg.trace,
            cfg.forwarding,
        ));
        cache.stats().reads.inc();
        let underlying = AutoupdatingReader::new(context, cache, params.clone());
        Self {
            cache,
            params,
            underlying,
            entry: None,
            partition_exists: false,
        }
    }

    pub fn cache(&self) -> &'a C {
        self.cache
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.params.schema()
    }

    pub fn permit(&self) -> Permit {
        self.params.permit()
    }

    pub fn range(&self) -> &PartitionRange {
        self.params.range()
    }

    pub fn slice(&self) -> &Slice {
        self.params.slice()
    }

    pub fn priority(&self) -> Priority {
        self.params.priority()
    }

    pub fn trace(&self) -> &Span {
        self.params.trace()
    }

    pub fn forwarding(&self) -> Forwarding {
        self.params.forwarding()
    }

    pub fn is_range_query(&self) -> bool {
        self.params.is_range_query()
    }

    pub fn digest_requested(&self) -> bool {
        self.params.digest_requested()
    }

    pub fn underlying(&self) -> &AutoupdatingReader<'a, E, C> {
        &self.underlying
    }

    pub fn underlying_mut(&mut self) -> &mut AutoupdatingReader<'a, E, C> {
        &mut self.underlying
    }

    /// The partition most recently entered.
    pub fn entry(&self) -> Option<&Entry<C::Snapshot>> {
        self.entry.as_ref()
    }

    /// Key of the current partition.
    ///
    /// Single-partition scans know their key before entering any partition.
    pub fn key(&self) -> Option<&DecoratedKey> {
        match &self.entry {
            Some(entry) => Some(entry.key()),
            None => self.params.range().singular_key(),
        }
    }

    /// Phase of the current partition.
    pub fn phase(&self) -> Option<Phase> {
        self.entry.as_ref().map(Entry::phase)
    }

    /// Whether the current partition exists in underlying storage.
    ///
    /// Only meaningful after [ReadContext::ensure_underlying].
    pub fn partition_exists(&self) -> bool {
        self.partition_exists
    }

    /// Record that an underlying reader was created for this scan.
    pub fn on_underlying_created(&self) {
        self.params.on_underlying_created();
    }

    /// Enter a new partition, replacing the previous one.
    pub fn enter_partition(&mut self, entry: Entry<C::Snapshot>) {
        self.entry = Some(entry);
    }

    /// Make sure the underlying reader is positioned in the current partition.
    ///
    /// For [Entry::Probe], the reader is moved onto the partition and its first fragment is read to
    /// learn whether the partition exists. For [Entry::Present], no storage is touched.
    pub async fn ensure_underlying(&mut self) -> Result<(), Error> {
        let span = self.params.trace().clone();
        async {
            let (key, snapshot, phase) = match &self.entry {
                None => return Err(Error::NoPartition),
                Some(Entry::Present { .. }) => {
                    self.partition_exists = true;
                    return Ok(());
                }
                Some(Entry::Probe {
                    key,
                    snapshot,
                    phase,
                }) => (key.clone(), snapshot.clone(), *phase),
            };
            self.underlying
                .fast_forward_to_snapshot(PartitionRange::singular(key.clone()), snapshot, phase)
                .await?;
            self.partition_exists = self.underlying.read().await?.is_some();
            debug!(%key, phase, exists = self.partition_exists, "probed underlying partition");

            // The reader now sits inside the partition
            if self.partition_exists {
                self.entry = Some(Entry::Present { key, phase });
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Close the underlying reader.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.underlying.close().await
    }
}

impl<E: Spawner + Metrics, C: Cache> Drop for ReadContext<'_, E, C> {
    fn drop(&mut self) {
        let stats = self.cache.stats();
        stats.reads_done.inc();
        if self.params.underlying_created() > 0 {
            stats.reads_with_misses.inc();
        } else {
            stats.reads_with_no_misses.inc();
        }
    }
}
