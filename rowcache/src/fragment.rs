//! Fragments of a partition stream.

use crate::ring::DecoratedKey;
use bytes::Bytes;

/// A piece of a partition as emitted by a reader.
///
/// A well-formed stream is a sequence of partitions, each opened by [Fragment::PartitionStart],
/// followed by any number of [Fragment::Row]s in clustering order and closed by
/// [Fragment::PartitionEnd].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    PartitionStart(DecoratedKey),
    Row { clustering: Bytes, value: Bytes },
    PartitionEnd,
}

impl Fragment {
    pub fn is_partition_start(&self) -> bool {
        matches!(self, Self::PartitionStart(_))
    }

    /// Key of the partition opened by this fragment, if it is a partition start.
    pub fn partition_key(&self) -> Option<&DecoratedKey> {
        match self {
            Self::PartitionStart(key) => Some(key),
            _ => None,
        }
    }
}
