//! In-memory implementations of [Cache] and [Reader].
//!
//! [MemoryCache] keeps every snapshot it was ever given, so any phase it reports stays
//! readable. It models a flush the way a row cache performs one: [MemoryCache::begin_update]
//! bumps the phase and installs the new snapshot, but positions at or after the update boundary
//! keep reading the previous snapshot until [MemoryCache::update_to] sweeps the boundary past them
//! (or [MemoryCache::finish_update] completes the update).

use crate::{
    cache::{Cache, Phase, Stats},
    fragment::Fragment,
    query::{Params, Permit, Priority},
    ring::{DecoratedKey, PartitionRange, RingPosition},
    source::Reader,
    Error,
};
use bytes::Bytes;
use commonware_runtime::reschedule;
use std::{
    collections::{BTreeMap, VecDeque},
    io,
    ops::Bound,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Rows of a partition, keyed by clustering key.
pub type Rows = BTreeMap<Bytes, Bytes>;

/// Immutable view of storage.
#[derive(Clone, Default, Debug)]
pub struct Snapshot {
    partitions: Arc<BTreeMap<DecoratedKey, Rows>>,
}

impl Snapshot {
    pub fn new(partitions: impl IntoIterator<Item = (DecoratedKey, Rows)>) -> Self {
        Self {
            partitions: Arc::new(partitions.into_iter().collect()),
        }
    }

    /// A snapshot where every partition holds a single empty row.
    pub fn from_keys(keys: impl IntoIterator<Item = DecoratedKey>) -> Self {
        Self::new(keys.into_iter().map(|key| {
            let mut rows = Rows::new();
            rows.insert(Bytes::new(), Bytes::new());
            (key, rows)
        }))
    }

    pub fn contains(&self, key: &DecoratedKey) -> bool {
        self.partitions.contains_key(key)
    }

    /// Keys of all partitions in `range`, in ring order.
    pub fn keys(&self, range: &PartitionRange) -> Vec<DecoratedKey> {
        self.partitions
            .keys()
            .filter(|key| range.contains(key))
            .cloned()
            .collect()
    }
}

/// Counts reader activity and injects failures.
#[derive(Default)]
pub struct Tracker {
    created: AtomicUsize,
    closed: AtomicUsize,
    operations: AtomicUsize,
    failed_creates: AtomicUsize,
    failed_closes: AtomicUsize,
    last_priority: Mutex<Option<Priority>>,
}

impl Tracker {
    /// Number of readers created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of readers closed (including closes that reported a failure).
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of readers created but not yet closed.
    pub fn live(&self) -> usize {
        self.created() - self.closed()
    }

    /// Number of storage operations (reads, skips, fast-forwards) performed by all readers.
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Priority the most recently created reader was opened with.
    pub fn last_priority(&self) -> Option<Priority> {
        *self.last_priority.lock().unwrap()
    }

    /// Fail the next `count` reader creations.
    pub fn fail_creates(&self, count: usize) {
        self.failed_creates.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` reader closes.
    pub fn fail_closes(&self, count: usize) {
        self.failed_closes.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Reader over a [Snapshot].
///
/// Partitions are buffered whole, one at a time, truncated to the slice's row limit.
pub struct MemoryReader {
    snapshot: Snapshot,
    range: PartitionRange,
    row_limit: usize,
    tracker: Arc<Tracker>,
    _permit: Permit,

    buffer: VecDeque<Fragment>,
    cursor: Option<DecoratedKey>,
    in_partition: bool,
    end_of_stream: bool,
}

impl MemoryReader {
    fn fill(&mut self) {
        let lower = match &self.cursor {
            Some(key) => Bound::Excluded(key),
            None => self.range.start().as_ref(),
        };
        let next = self
            .snapshot
            .partitions
            .range::<DecoratedKey, _>((lower, Bound::Unbounded))
            .next()
            .filter(|(key, _)| self.range.contains(key));
        let Some((key, rows)) = next else {
            self.end_of_stream = true;
            return;
        };
        self.buffer.push_back(Fragment::PartitionStart(key.clone()));
        for (clustering, value) in rows.iter().take(self.row_limit) {
            self.buffer.push_back(Fragment::Row {
                clustering: clustering.clone(),
                value: value.clone(),
            });
        }
        self.buffer.push_back(Fragment::PartitionEnd);
        self.cursor = Some(key.clone());
    }

    fn operation(&self) {
        self.tracker.operations.fetch_add(1, Ordering::SeqCst);
    }
}

impl Reader for MemoryReader {
    async fn next_partition(&mut self) -> Result<(), Error> {
        reschedule().await;
        self.operation();
        if !self.in_partition {
            return Ok(());
        }
        while self
            .buffer
            .front()
            .is_some_and(|fragment| !fragment.is_partition_start())
        {
            self.buffer.pop_front();
        }
        self.in_partition = false;
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<Fragment>, Error> {
        reschedule().await;
        self.operation();
        if self.buffer.is_empty() && !self.end_of_stream {
            self.fill();
        }
        let fragment = self.buffer.pop_front();
        match &fragment {
            Some(Fragment::PartitionStart(_)) => self.in_partition = true,
            Some(Fragment::PartitionEnd) => self.in_partition = false,
            _ => {}
        }
        Ok(fragment)
    }

    fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    fn is_buffer_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    async fn fast_forward_to(&mut self, range: PartitionRange) -> Result<(), Error> {
        reschedule().await;
        self.operation();
        self.range = range;
        self.buffer.clear();
        self.cursor = None;
        self.in_partition = false;
        self.end_of_stream = false;
        Ok(())
    }

    async fn close(self) -> Result<(), Error> {
        reschedule().await;
        self.tracker.closed.fetch_add(1, Ordering::SeqCst);
        if Tracker::take_failure(&self.tracker.failed_closes) {
            return Err(Error::Io(io::Error::other("injected close failure")));
        }
        Ok(())
    }
}

struct State {
    phase: Phase,
    snapshots: BTreeMap<Phase, Snapshot>,

    // While an update is in progress, positions at or after the boundary belong to `phase - 1`.
    boundary: Option<RingPosition>,
}

/// A [Cache] over in-memory snapshots.
pub struct MemoryCache {
    state: Mutex<State>,
    tracker: Arc<Tracker>,
    stats: Stats,
}

impl MemoryCache {
    /// Create a cache whose first phase (`0`) reads `snapshot`.
    pub fn new(stats: Stats, snapshot: Snapshot) -> Self {
        Self {
            state: Mutex::new(State {
                phase: 0,
                snapshots: BTreeMap::from([(0, snapshot)]),
                boundary: None,
            }),
            tracker: Arc::new(Tracker::default()),
            stats,
        }
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Latest phase.
    pub fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase
    }

    /// Replace the whole of storage with `snapshot` at once, returning the new phase.
    pub fn advance(&self, snapshot: Snapshot) -> Phase {
        let mut state = self.state.lock().unwrap();
        state.phase += 1;
        let phase = state.phase;
        state.snapshots.insert(phase, snapshot);
        state.boundary = None;
        phase
    }

    /// Start moving the cache onto `snapshot`, returning the new phase.
    ///
    /// Until the boundary is moved, every position keeps reading the previous snapshot.
    pub fn begin_update(&self, snapshot: Snapshot) -> Phase {
        let mut state = self.state.lock().unwrap();
        state.phase += 1;
        let phase = state.phase;
        state.snapshots.insert(phase, snapshot);
        state.boundary = Some(RingPosition::Min);
        phase
    }

    /// Move the update boundary: positions before `position` now read the new snapshot.
    pub fn update_to(&self, position: RingPosition) {
        let mut state = self.state.lock().unwrap();
        if state.boundary.is_some() {
            state.boundary = Some(position);
        }
    }

    /// Complete the update started by [MemoryCache::begin_update].
    pub fn finish_update(&self) {
        self.state.lock().unwrap().boundary = None;
    }
}

impl Cache for MemoryCache {
    type Snapshot = Snapshot;
    type Reader = MemoryReader;

    fn phase_of(&self, position: &RingPosition) -> Phase {
        let state = self.state.lock().unwrap();
        match &state.boundary {
            Some(boundary) if position >= boundary => state.phase - 1,
            _ => state.phase,
        }
    }

    fn snapshot_for_phase(&self, phase: Phase) -> Snapshot {
        let state = self.state.lock().unwrap();
        match state.snapshots.get(&phase) {
            Some(snapshot) => snapshot.clone(),
            None => panic!("no snapshot for phase {phase}"),
        }
    }

    async fn create_underlying_reader(
        &self,
        params: &Params,
        snapshot: &Snapshot,
        range: &PartitionRange,
    ) -> Result<MemoryReader, Error> {
        reschedule().await;
        if Tracker::take_failure(&self.tracker.failed_creates) {
            return Err(Error::Io(io::Error::other("injected create failure")));
        }
        self.tracker.created.fetch_add(1, Ordering::SeqCst);
        *self.tracker.last_priority.lock().unwrap() = Some(params.priority());
        let row_limit = params
            .slice()
            .row_limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(MemoryReader {
            snapshot: snapshot.clone(),
            range: range.clone(),
            row_limit,
            tracker: self.tracker.clone(),
            _permit: params.permit(),
            buffer: VecDeque::new(),
            cursor: None,
            in_partition: false,
            end_of_stream: false,
        })
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}
