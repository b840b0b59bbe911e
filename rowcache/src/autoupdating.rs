//! A reader over underlying storage that follows the cache from phase to phase.
//!
//! The cache serves scans from memory and falls back to storage for partitions it does not hold.
//! Which snapshot of storage is correct for a given position depends on the cache's phase at that
//! position, which changes whenever the cache starts reflecting new storage (after a flush, for
//! example). [AutoupdatingReader] hides this from the scan: before moving to each partition, it
//! checks whether its reader is still bound to the phase owning the scan position and, if not,
//! replaces it with a reader over the right snapshot that resumes strictly after the last emitted
//! partition.
//!
//! # Retirement
//!
//! Closing a stale reader is not serialized ahead of creating its replacement: the stale reader is
//! handed to a background task (spawned with the `retire` label) so its teardown overlaps with the
//! creation of the new reader. Outstanding retirements are awaited by
//! [AutoupdatingReader::close].

use crate::{
    cache::{Cache, Phase},
    fragment::Fragment,
    query::Params,
    ring::{DecoratedKey, PartitionRange, RingPosition},
    source::Reader,
    Error,
};
use commonware_runtime::{Handle, Metrics, Spawner};
use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Reader over underlying storage that stays consistent with the cache's phases.
pub struct AutoupdatingReader<'a, E: Spawner + Metrics, C: Cache> {
    context: E,
    cache: &'a C,
    params: Arc<Params>,

    reader: Option<C::Reader>,
    phase: Phase,
    range: PartitionRange,

    // Key of the partition emitted before the most recent one (folded into `range` on refresh).
    last_key: Option<DecoratedKey>,
    // Key of the most recently emitted partition.
    new_last_key: Option<DecoratedKey>,

    retiring: FuturesUnordered<Handle<()>>,
}

impl<'a, E: Spawner + Metrics, C: Cache> AutoupdatingReader<'a, E, C> {
    /// Create a reader over the range requested in `params`.
    ///
    /// No underlying reader is created until the first call to
    /// [AutoupdatingReader::move_to_next_partition] or [AutoupdatingReader::fast_forward_to].
    pub fn new(context: E, cache: &'a C, params: Arc<Params>) -> Self {
        let range = params.range().clone();
        Self {
            context,
            cache,
            params,
            reader: None,
            phase: 0,
            range,
            last_key: None,
            new_last_key: None,
            retiring: FuturesUnordered::new(),
        }
    }

    /// Move to the next partition and return its [Fragment::PartitionStart].
    ///
    /// Returns `None` once the range is exhausted.
    ///
    /// # Panics
    ///
    /// Panics if the underlying reader returns anything other than a partition start after being
    /// moved to the next partition.
    pub async fn move_to_next_partition(&mut self) -> Result<Option<Fragment>, Error> {
        self.reap();
        if let Some(key) = self.new_last_key.take() {
            self.last_key = Some(key);
        }
        let start = self.population_range_start();
        let phase = self.cache.phase_of(&start);

        let reader = match self.reader.take() {
            Some(reader) if self.phase == phase => self.reader.insert(reader),
            stale => {
                if let Some(last_key) = &self.last_key {
                    let Some(range) = self.range.split_after(last_key) else {
                        debug!(%last_key, "underlying range exhausted");
                        if let Some(stale) = stale {
                            if let Err(err) = stale.close().await {
                                warn!(?err, "failed to close stale underlying reader");
                            }
                        }
                        return Ok(None);
                    };
                    self.range = range;
                    self.last_key = None;
                }
                if let Some(stale) = stale {
                    debug!(from = self.phase, to = phase, "recreating underlying reader");
                    self.cache.stats().underlying_recreations.inc();
                    self.retire(stale);
                }
                let reader = self.create(phase).await?;
                self.reader.insert(reader)
            }
        };

        reader.next_partition().await?;
        if reader.is_end_of_stream() && reader.is_buffer_empty() {
            return Ok(None);
        }
        let fragment = reader.next().await?;
        if let Some(fragment) = &fragment {
            let Fragment::PartitionStart(key) = fragment else {
                panic!("expected partition start after next_partition, got {fragment:?}");
            };
            trace!(%key, phase, "entered underlying partition");
            self.new_last_key = Some(key.clone());
        }
        Ok(fragment)
    }

    /// Reposition onto `range`, reading the snapshot responsible for its start.
    ///
    /// The phase is looked up at the start of the new `range`, not at the position the current
    /// reader was at.
    pub async fn fast_forward_to(&mut self, range: PartitionRange) -> Result<(), Error> {
        let (snapshot, phase) = self.cache.snapshot_of(&range.start_position());
        self.fast_forward_to_snapshot(range, snapshot, phase).await
    }

    /// Reposition onto `range` of `snapshot`, which the cache associates with `phase`.
    ///
    /// If the current reader is already bound to `phase`, it is fast-forwarded in place.
    /// Otherwise it is closed and replaced.
    pub async fn fast_forward_to_snapshot(
        &mut self,
        range: PartitionRange,
        snapshot: C::Snapshot,
        phase: Phase,
    ) -> Result<(), Error> {
        self.range = range;
        self.last_key = None;
        self.new_last_key = None;
        if let Some(reader) = self.reader.as_mut() {
            if self.phase == phase {
                self.cache.stats().underlying_partition_skips.inc();
                return reader.fast_forward_to(self.range.clone()).await;
            }
            self.cache.stats().underlying_recreations.inc();
        }
        if let Some(stale) = self.reader.take() {
            if let Err(err) = stale.close().await {
                warn!(?err, "failed to close stale underlying reader");
            }
        }
        let reader = self
            .cache
            .create_underlying_reader(&self.params, &snapshot, &self.range)
            .await?;
        self.params.on_underlying_created();
        self.reader = Some(reader);
        self.phase = phase;
        Ok(())
    }

    /// Pull the next fragment from the current underlying reader.
    pub async fn read(&mut self) -> Result<Option<Fragment>, Error> {
        match self.reader.as_mut() {
            Some(reader) => reader.next().await,
            None => Err(Error::NoReader),
        }
    }

    /// Close the underlying reader (if any) and wait for all retired readers to close.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) -> Result<(), Error> {
        let result = match self.reader.take() {
            Some(reader) => reader.close().await,
            None => Ok(()),
        };
        while let Some(retired) = self.retiring.next().await {
            if let Err(err) = retired {
                warn!(?err, "retirement task failed");
            }
        }
        result
    }

    /// Phase the current underlying reader was created for.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Range the current underlying reader covers.
    pub fn range(&self) -> &PartitionRange {
        &self.range
    }

    /// Whether an underlying reader is currently held.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    /// Position from which the cache's phase is looked up before moving to the next partition.
    pub fn population_range_start(&self) -> RingPosition {
        match &self.last_key {
            Some(key) => RingPosition::After(key.clone()),
            None => self.range.start_position(),
        }
    }

    async fn create(&mut self, phase: Phase) -> Result<C::Reader, Error> {
        let snapshot = self.cache.snapshot_for_phase(phase);
        let reader = self
            .cache
            .create_underlying_reader(&self.params, &snapshot, &self.range)
            .await?;
        self.params.on_underlying_created();
        debug!(phase, range = ?self.range, "created underlying reader");
        self.phase = phase;
        Ok(reader)
    }

    fn retire(&mut self, reader: C::Reader) {
        let handle = self
            .context
            .with_label("retire")
            .spawn(move |_| async move {
                if let Err(err) = reader.close().await {
                    warn!(?err, "failed to close retired underlying reader");
                }
            });
        self.retiring.push(handle);
    }

    // Drop retirements that have already completed.
    fn reap(&mut self) {
        while let Some(Some(retired)) = self.retiring.next().now_or_never() {
            if let Err(err) = retired {
                warn!(?err, "retirement task failed");
            }
        }
    }
}

impl<E: Spawner + Metrics, C: Cache> Drop for AutoupdatingReader<'_, E, C> {
    fn drop(&mut self) {
        if self.reader.is_some() {
            debug!(phase = self.phase, "underlying reader dropped without close");
        }
    }
}
