use core::fmt;

use byte_view::ByteView;

/// 1-based position of an entry in the log. Index 0 is reserved for the
/// synthetic always-present entry described in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, ByteView)]
#[repr(transparent)]
pub struct Index(pub u64);

impl Index {
	pub const ZERO: Index = Index(0);

	#[inline]
	pub fn get(self) -> u64 {
		self.0
	}

	#[inline]
	pub fn next(self) -> Index {
		Index(self.0 + 1)
	}

	#[inline]
	pub fn checked_prev(self) -> Option<Index> {
		self.0.checked_sub(1).map(Index)
	}
}

impl From<u64> for Index {
	fn from(value: u64) -> Self {
		Index(value)
	}
}

impl From<Index> for u64 {
	fn from(value: Index) -> Self {
		value.0
	}
}

impl fmt::Display for Index {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Raft leadership epoch recorded per entry. Monotonic, never decreases
/// for a given index across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, ByteView)]
#[repr(transparent)]
pub struct Term(pub u64);

impl Term {
	pub const ZERO: Term = Term(0);

	#[inline]
	pub fn get(self) -> u64 {
		self.0
	}
}

impl From<u64> for Term {
	fn from(value: u64) -> Self {
		Term(value)
	}
}

impl From<Term> for u64 {
	fn from(value: Term) -> Self {
		value.0
	}
}

impl fmt::Display for Term {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Non-negative 32-bit page index. Pages are persisted as files named by
/// this value under the `pages/` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ByteView)]
#[repr(transparent)]
pub struct PageIndex(pub u32);

impl PageIndex {
	#[inline]
	pub fn get(self) -> u32 {
		self.0
	}
}

impl From<u32> for PageIndex {
	fn from(value: u32) -> Self {
		PageIndex(value)
	}
}

impl fmt::Display for PageIndex {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn index_ordering() {
		assert!(Index(1) < Index(2));
		assert_eq!(Index(5).next(), Index(6));
		assert_eq!(Index(0).checked_prev(), None);
		assert_eq!(Index(1).checked_prev(), Some(Index(0)));
	}
}
