//! Serve partition scans from a row cache that stays consistent with its underlying storage.
//!
//! A row cache holds some partitions of a table in memory and falls back to persistent storage for
//! the rest. The picture of storage the cache reflects changes over time (memtables are flushed,
//! sstables are compacted, entries are invalidated). Each change bumps the cache's [Phase], and
//! every phase is tied to an immutable snapshot of storage. A scan that falls back to storage must
//! read the snapshot of whichever phase currently owns the part of the ring it is scanning, even
//! if that phase changes while the scan is in progress.
//!
//! [ReadContext] bundles the parameters of one scan and owns the [AutoupdatingReader] it falls back
//! to. The [AutoupdatingReader] checks the phase before every partition and, when it changed,
//! replaces its reader with one over the new snapshot that resumes strictly after the last
//! partition it emitted. No partition is skipped or emitted twice.
//!
//! # Status
//!
//! `commonware-rowcache` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.
//!
//! # Example
//!
//! ```rust
//! use commonware_runtime::{deterministic, Runner};
//! use commonware_rowcache::{
//!     mocks::{MemoryCache, Snapshot},
//!     Admission, Config, DecoratedKey, Fragment, PartitionRange, ReadContext, Schema, Stats,
//! };
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     // Create a cache over storage holding two partitions
//!     let keys: Vec<_> = (0..2u64).map(|i| DecoratedKey::new(i, i.to_be_bytes().to_vec())).collect();
//!     let cache = MemoryCache::new(Stats::init(&context), Snapshot::from_keys(keys.clone()));
//!
//!     // Scan the whole ring
//!     let permit = Admission::new(1).admit().await;
//!     let cfg = Config {
//!         range: PartitionRange::full(),
//!         slice: Default::default(),
//!         priority: Default::default(),
//!         trace: tracing::Span::none(),
//!         forwarding: Default::default(),
//!     };
//!     let mut ctx = ReadContext::new(context, &cache, Schema::new("ks", "cf", 1), permit, cfg);
//!     let first = ctx.underlying_mut().move_to_next_partition().await.unwrap();
//!     assert_eq!(first, Some(Fragment::PartitionStart(keys[0].clone())));
//!
//!     // Storage changes mid-scan: the scan continues from the new snapshot
//!     cache.advance(Snapshot::from_keys(keys.clone()));
//!     let second = ctx.underlying_mut().move_to_next_partition().await.unwrap();
//!     assert_eq!(second, Some(Fragment::PartitionStart(keys[1].clone())));
//!     assert_eq!(ctx.underlying_mut().move_to_next_partition().await.unwrap(), None);
//!
//!     // Close the scan
//!     ctx.close().await.unwrap();
//! });
//! ```

use thiserror::Error;

pub mod autoupdating;
pub mod cache;
pub mod context;
pub mod fragment;
pub mod mocks;
pub mod query;
pub mod ring;
pub mod source;

pub use autoupdating::AutoupdatingReader;
pub use cache::{Cache, Phase, Stats};
pub use context::{Config, Entry, ReadContext};
pub use fragment::Fragment;
pub use query::{Admission, Forwarding, Params, Permit, Priority, Schema, Slice};
pub use ring::{DecoratedKey, PartitionRange, RingPosition, Token};
pub use source::Reader;

/// Errors that can occur when reading from underlying storage.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no underlying reader")]
    NoReader,
    #[error("no partition entered")]
    NoPartition,
}
