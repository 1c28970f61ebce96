use byte_view::ByteView;

use crate::{address::Address, id::Term};

/// Set on [`IndexRecord::flags`] when the entry is a synthetic snapshot
/// marker rather than an ordinary append.
pub const FLAG_SNAPSHOT: u32 = 1 << 0;

/// Fixed-width record stored densely in the index file, one per entry
/// index. Matches the on-disk layout byte-for-byte: 8B address, 4B
/// length, 8B term, 8B timestamp (nanoseconds since epoch), 4B flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ByteView)]
pub struct IndexRecord {
	pub address: u64,
	pub length: u32,
	pub term: u64,
	pub timestamp_nanos: i64,
	pub flags: u32,
}

impl IndexRecord {
	pub fn new(address: Address, length: u32, term: Term, timestamp_nanos: i64, is_snapshot: bool) -> Self {
		Self {
			address: address.get(),
			length,
			term: term.get(),
			timestamp_nanos,
			flags: if is_snapshot { FLAG_SNAPSHOT } else { 0 },
		}
	}

	#[inline]
	pub fn address(&self) -> Address {
		Address(self.address)
	}

	#[inline]
	pub fn term(&self) -> Term {
		Term(self.term)
	}

	#[inline]
	pub fn is_snapshot(&self) -> bool {
		self.flags & FLAG_SNAPSHOT != 0
	}

	/// The synthetic entry 0: zero-length, term 0, never a snapshot.
	/// Preserved as specified rather than treated as a gap, per the
	/// open question on entry 0's handling.
	pub fn zero() -> Self {
		Self {
			address: 0,
			length: 0,
			term: 0,
			timestamp_nanos: 0,
			flags: 0,
		}
	}
}

/// An opaque, non-persistent tag attached to an appended entry. Held in
/// a volatile side map keyed by index and delivered to the state
/// machine at apply time; cleared on apply or on drop. Never written to
/// disk or surfaced again after a restart.
pub type Context = Box<dyn std::any::Any + Send + Sync>;

/// An in-memory log entry, decoded from an [`IndexRecord`] plus its
/// payload bytes (or freshly constructed by a caller appending one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
	pub term: Term,
	pub timestamp_nanos: i64,
	pub payload: Box<[u8]>,
	pub is_snapshot: bool,
}

impl Entry {
	pub fn new(term: Term, timestamp_nanos: i64, payload: impl Into<Box<[u8]>>) -> Self {
		Self {
			term,
			timestamp_nanos,
			payload: payload.into(),
			is_snapshot: false,
		}
	}

	pub fn snapshot(term: Term, timestamp_nanos: i64, payload: impl Into<Box<[u8]>>) -> Self {
		Self {
			term,
			timestamp_nanos,
			payload: payload.into(),
			is_snapshot: true,
		}
	}
}
