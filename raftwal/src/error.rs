use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{consts::PageSizeBoundsError, id::Index};

/// Failures that can occur while opening or initializing a log directory.
#[derive(Debug, Error)]
pub enum OpenError {
	#[error("The directory {} doesn't exist", _0.display())]
	NoSuchDir(PathBuf),

	#[error("{} is not a directory", _0.display())]
	NotADirectory(PathBuf),

	#[error(transparent)]
	PageSize(#[from] PageSizeBoundsError),

	#[error("Failed to read metadata record: {0}")]
	ReadMetadata(io::Error),

	#[error("Metadata record is corrupted: {0}")]
	CorruptMetadata(#[from] IntegrityError),

	#[error("Failed to read index file: {0}")]
	ReadIndex(io::Error),

	#[error(transparent)]
	Io(#[from] io::Error),
}

/// Mismatch between an on-disk record and its expected checksum or format.
#[derive(Debug, Error)]
pub enum IntegrityError {
	#[error("Metadata magic bytes {found:?} don't match expected {expected:?}")]
	BadMagic { expected: [u8; 4], found: [u8; 4] },

	#[error("Metadata format version {found} is not supported (expected {expected})")]
	UnsupportedVersion { expected: u32, found: u32 },

	#[error("Metadata checksum {found:#010x} doesn't match computed {expected:#010x}")]
	ChecksumMismatch { expected: u32, found: u32 },

	#[error("Index record {0} references an address range beyond the allocated page space")]
	AddressOutOfBounds(Index),
}

/// Errors returned by day-to-day append/read/commit/apply operations
/// against an open log. Distinct from [`OpenError`], which only applies
/// to the initial `open` call.
#[derive(Debug, Error)]
pub enum Error {
	/// The log was explicitly closed or dropped; no further operations
	/// are permitted.
	#[error("The log has been disposed")]
	Disposed,

	/// A prior durable-path I/O failure left the log in an unrecoverable
	/// state; only `close` is permitted.
	#[error("The log is poisoned by a prior unrecoverable I/O failure")]
	Poisoned,

	/// Attempted to append or overwrite at or below `last_committed`.
	#[error("Cannot overwrite index {index}; {last_committed} is already committed")]
	OverwriteCommitted { index: Index, last_committed: Index },

	/// A read, lookup, or truncate referenced an index outside
	/// `[1..=last_entry]`.
	#[error("Index {index} is out of range (log holds [1..={last_entry}])")]
	OutOfRange { index: Index, last_entry: Index },

	/// An append's `start_index` skipped ahead of the log's tail.
	#[error("Append at {start_index} would leave a gap; expected at most {expected}")]
	NonContiguousAppend { start_index: Index, expected: Index },

	#[error("I/O failure at offset {offset} in {}: {source}", path.display())]
	Io {
		path: PathBuf,
		offset: u64,
		#[source]
		source: io::Error,
	},

	#[error(transparent)]
	Integrity(#[from] IntegrityError),

	/// A suspending operation observed cancellation. This is a local
	/// outcome, not a fault, and must never be reported to observers
	/// other than the caller that requested cancellation.
	#[error("Operation was cancelled")]
	Cancelled,
}

impl Error {
	pub fn is_poisoning(&self) -> bool {
		matches!(self, Error::Io { .. } | Error::Integrity(_))
	}
}
