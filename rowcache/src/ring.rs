//! Positions and ranges on the partition ring.
//!
//! Every partition key is placed on the ring by its [Token]. Keys are ordered by token first and
//! by their raw bytes second, which yields a total order that scans follow. A [RingPosition] can
//! additionally point at the gap immediately before or after a key, which is what range bounds
//! and resumption points need.

use bytes::Bytes;
use commonware_utils::hex;
use std::{cmp::Ordering, fmt, ops::Bound};

/// Placement of a partition on the ring.
pub type Token = u64;

/// A partition key together with its [Token].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DecoratedKey {
    token: Token,
    key: Bytes,
}

impl DecoratedKey {
    pub fn new(token: Token, key: impl Into<Bytes>) -> Self {
        Self {
            token,
            key: key.into(),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.token, hex(&self.key))
    }
}

impl fmt::Display for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A point on the ring.
///
/// `Before(k)` sorts after every key smaller than `k` and before `k` itself, `After(k)` sorts after
/// `k` and before every key larger than `k`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RingPosition {
    Min,
    Before(DecoratedKey),
    After(DecoratedKey),
    Max,
}

impl RingPosition {
    /// Position of the first key a scan starting at `bound` may return.
    pub fn for_start(bound: &Bound<DecoratedKey>) -> Self {
        match bound {
            Bound::Unbounded => Self::Min,
            Bound::Included(key) => Self::Before(key.clone()),
            Bound::Excluded(key) => Self::After(key.clone()),
        }
    }

    /// Position of the gap following the last key a scan ending at `bound` may return.
    pub fn for_end(bound: &Bound<DecoratedKey>) -> Self {
        match bound {
            Bound::Unbounded => Self::Max,
            Bound::Included(key) => Self::After(key.clone()),
            Bound::Excluded(key) => Self::Before(key.clone()),
        }
    }

    /// Compare this position against a key.
    pub fn cmp_key(&self, key: &DecoratedKey) -> Ordering {
        match self {
            Self::Min => Ordering::Less,
            Self::Max => Ordering::Greater,
            Self::Before(k) => k.cmp(key).then(Ordering::Less),
            Self::After(k) => k.cmp(key).then(Ordering::Greater),
        }
    }

    // Min and Max are keyed as the extremes, weights break ties between positions of one key.
    fn rank(&self) -> (u8, Option<&DecoratedKey>, i8) {
        match self {
            Self::Min => (0, None, 0),
            Self::Before(key) => (1, Some(key), -1),
            Self::After(key) => (1, Some(key), 1),
            Self::Max => (2, None, 0),
        }
    }
}

impl Ord for RingPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for RingPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A range of partitions, ordered by ring position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionRange {
    start: Bound<DecoratedKey>,
    end: Bound<DecoratedKey>,
}

impl PartitionRange {
    pub fn new(start: Bound<DecoratedKey>, end: Bound<DecoratedKey>) -> Self {
        Self { start, end }
    }

    /// The range covering the whole ring.
    pub fn full() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// The range containing exactly `key`.
    pub fn singular(key: DecoratedKey) -> Self {
        Self::new(Bound::Included(key.clone()), Bound::Included(key))
    }

    /// The range starting at `key` (inclusive) and covering the rest of the ring.
    pub fn starting_with(key: DecoratedKey) -> Self {
        Self::new(Bound::Included(key), Bound::Unbounded)
    }

    pub fn start(&self) -> &Bound<DecoratedKey> {
        &self.start
    }

    pub fn end(&self) -> &Bound<DecoratedKey> {
        &self.end
    }

    /// Position from which a scan over this range begins.
    pub fn start_position(&self) -> RingPosition {
        RingPosition::for_start(&self.start)
    }

    /// Position at which a scan over this range stops.
    pub fn end_position(&self) -> RingPosition {
        RingPosition::for_end(&self.end)
    }

    /// Whether the range selects a single partition.
    pub fn is_singular(&self) -> bool {
        matches!((&self.start, &self.end), (Bound::Included(s), Bound::Included(e)) if s == e)
    }

    /// The key selected by a singular range.
    pub fn singular_key(&self) -> Option<&DecoratedKey> {
        match &self.start {
            Bound::Included(key) if self.is_singular() => Some(key),
            _ => None,
        }
    }

    /// Whether no key can fall inside the range.
    pub fn is_empty(&self) -> bool {
        self.start_position() >= self.end_position()
    }

    pub fn contains(&self, key: &DecoratedKey) -> bool {
        self.start_position().cmp_key(key) == Ordering::Less
            && self.end_position().cmp_key(key) == Ordering::Greater
    }

    /// Return the part of the range strictly after `key`, or `None` if nothing remains.
    pub fn split_after(&self, key: &DecoratedKey) -> Option<Self> {
        let after = RingPosition::After(key.clone());
        if self.end_position() <= after {
            return None;
        }
        if self.start_position() >= after {
            return Some(self.clone());
        }
        Some(Self::new(Bound::Excluded(key.clone()), self.end.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn key(token: Token) -> DecoratedKey {
        DecoratedKey::new(token, token.to_be_bytes().to_vec())
    }

    #[test]
    fn test_key_order_token_first() {
        let a = DecoratedKey::new(1, b"z".to_vec());
        let b = DecoratedKey::new(2, b"a".to_vec());
        let c = DecoratedKey::new(2, b"b".to_vec());
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_position_order() {
        let k = key(5);
        assert!(RingPosition::Min < RingPosition::Before(key(0)));
        assert!(RingPosition::Before(k.clone()) < RingPosition::After(k.clone()));
        assert!(RingPosition::After(k.clone()) < RingPosition::Before(key(6)));
        assert!(RingPosition::After(key(u64::MAX)) < RingPosition::Max);
        assert_eq!(RingPosition::Before(k.clone()).cmp_key(&k), Ordering::Less);
        assert_eq!(RingPosition::After(k.clone()).cmp_key(&k), Ordering::Greater);
        assert_eq!(RingPosition::After(key(4)).cmp_key(&k), Ordering::Less);
    }

    #[test]
    fn test_contains() {
        let range = PartitionRange::new(Bound::Included(key(2)), Bound::Excluded(key(8)));
        assert!(!range.contains(&key(1)));
        assert!(range.contains(&key(2)));
        assert!(range.contains(&key(7)));
        assert!(!range.contains(&key(8)));

        let range = PartitionRange::singular(key(4));
        assert!(range.is_singular());
        assert_eq!(range.singular_key(), Some(&key(4)));
        assert!(range.contains(&key(4)));
        assert!(!range.contains(&key(5)));
        assert!(!PartitionRange::full().is_singular());
        assert!(PartitionRange::full().contains(&key(0)));
    }

    #[test_case(Bound::Unbounded, Bound::Unbounded, 5 => Some(PartitionRange::new(Bound::Excluded(key(5)), Bound::Unbounded)); "full ring")]
    #[test_case(Bound::Included(key(2)), Bound::Excluded(key(8)), 5 => Some(PartitionRange::new(Bound::Excluded(key(5)), Bound::Excluded(key(8)))); "middle")]
    #[test_case(Bound::Included(key(2)), Bound::Excluded(key(8)), 7 => Some(PartitionRange::new(Bound::Excluded(key(7)), Bound::Excluded(key(8)))); "last gap")]
    #[test_case(Bound::Included(key(2)), Bound::Included(key(8)), 8 => None; "inclusive end")]
    #[test_case(Bound::Included(key(2)), Bound::Excluded(key(8)), 8 => None; "exclusive end")]
    #[test_case(Bound::Included(key(2)), Bound::Excluded(key(8)), 9 => None; "past end")]
    #[test_case(Bound::Included(key(6)), Bound::Unbounded, 5 => Some(PartitionRange::new(Bound::Included(key(6)), Bound::Unbounded)); "before start")]
    #[test_case(Bound::Excluded(key(5)), Bound::Unbounded, 5 => Some(PartitionRange::new(Bound::Excluded(key(5)), Bound::Unbounded)); "at exclusive start")]
    #[test_case(Bound::Included(key(5)), Bound::Included(key(5)), 5 => None; "singular")]
    fn test_split_after(
        start: Bound<DecoratedKey>,
        end: Bound<DecoratedKey>,
        split: Token,
    ) -> Option<PartitionRange> {
        PartitionRange::new(start, end).split_after(&key(split))
    }

    #[test]
    fn test_split_after_excludes_key() {
        let range = PartitionRange::full();
        let rest = range.split_after(&key(3)).unwrap();
        assert!(!rest.contains(&key(3)));
        assert!(rest.contains(&key(4)));
        assert_eq!(rest.start_position(), RingPosition::After(key(3)));
    }

    #[test]
    fn test_empty() {
        assert!(!PartitionRange::full().is_empty());
        assert!(!PartitionRange::singular(key(1)).is_empty());
        assert!(PartitionRange::new(Bound::Excluded(key(1)), Bound::Included(key(1))).is_empty());
        assert!(PartitionRange::new(Bound::Included(key(3)), Bound::Excluded(key(3))).is_empty());
    }
}
