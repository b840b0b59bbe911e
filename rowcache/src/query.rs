//! Parameters shared by every step of a single scan.

use crate::ring::PartitionRange;
use async_lock::{Semaphore, SemaphoreGuardArc};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::Span;

/// Identity of the table being read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub keyspace: String,
    pub table: String,
    pub version: u64,
}

impl Schema {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>, version: u64) -> Arc<Self> {
        Arc::new(Self {
            keyspace: keyspace.into(),
            table: table.into(),
            version,
        })
    }
}

/// Bounds the number of scans that may hold underlying resources at once.
#[derive(Clone)]
pub struct Admission {
    semaphore: Arc<Semaphore>,
}

impl Admission {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Wait until a scan may start.
    pub async fn admit(&self) -> Permit {
        Permit {
            _guard: Arc::new(self.semaphore.acquire_arc().await),
        }
    }

    /// Admit a scan only if doing so does not require waiting.
    pub fn try_admit(&self) -> Option<Permit> {
        self.semaphore
            .try_acquire_arc()
            .map(|guard| Permit {
                _guard: Arc::new(guard),
            })
    }
}

/// Admission held for the lifetime of a scan (and every reader it creates).
#[derive(Clone)]
pub struct Permit {
    _guard: Arc<SemaphoreGuardArc>,
}

/// Which part of each partition a scan asks for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Slice {
    /// Whether the coordinator wants a digest of the result instead of the data.
    pub with_digest: bool,

    /// Maximum number of rows returned per partition.
    pub row_limit: Option<u64>,
}

/// Class of I/O a scan is accounted against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Priority {
    #[default]
    Query,

    /// Background work (repair, compaction) that should not compete with queries.
    Maintenance,
}

/// Whether readers created for a scan may later be fast-forwarded to a new range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Forwarding {
    #[default]
    No,
    Yes,
}

/// Everything a [crate::Cache] needs to know to create an underlying reader on behalf of a scan.
pub struct Params {
    schema: Arc<Schema>,
    permit: Permit,
    range: PartitionRange,
    slice: Slice,
    priority: Priority,
    trace: Span,
    forwarding: Forwarding,
    range_query: bool,

    underlying_created: AtomicU64,
}

impl Params {
    pub(crate) fn new(
        schema: Arc<Schema>,
        permit: Permit,
        range: PartitionRange,
        slice: Slice,
        priority: Priority,
        trace: Span,
        forwarding: Forwarding,
    ) -> Self {
        let range_query = !range.is_singular();
        Self {
            schema,
            permit,
            range,
            slice,
            priority,
            trace,
            forwarding,
            range_query,
            underlying_created: AtomicU64::new(0),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn permit(&self) -> Permit {
        self.permit.clone()
    }

    /// The range originally requested by the scan.
    pub fn range(&self) -> &PartitionRange {
        &self.range
    }

    pub fn slice(&self) -> &Slice {
        &self.slice
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn trace(&self) -> &Span {
        &self.trace
    }

    pub fn forwarding(&self) -> Forwarding {
        self.forwarding
    }

    pub fn is_range_query(&self) -> bool {
        self.range_query
    }

    pub fn digest_requested(&self) -> bool {
        self.slice.with_digest
    }

    /// Record that an underlying reader was created for this scan.
    pub fn on_underlying_created(&self) {
        self.underlying_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of underlying readers created for this scan so far.
    pub fn underlying_created(&self) -> u64 {
        self.underlying_created.load(Ordering::Relaxed)
    }
}
