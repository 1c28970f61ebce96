use std::{
	fs::{self, File},
	io,
	path::{Path, PathBuf},
};

use byte_view::{ByteView, ViewBuf};

use crate::{
	consts::{META_FORMAT_VERSION, META_MAGIC},
	error::IntegrityError,
	id::{Index, Term},
	io::IoTarget,
};

/// Fixed-size binary record persisting Raft voter state: current term,
/// candidate voted-for identifier, and the commit/apply watermarks.
/// All-zero `voted_for` means "none". Checksummed with CRC32 over the
/// preceding bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ByteView)]
pub struct MetaRecord {
	pub magic: [u8; 4],
	pub format_version: u32,
	pub term: u64,
	pub voted_for: [u8; 16],
	pub last_committed_index: u64,
	pub last_applied_index: u64,
	pub checksum: u32,
}

impl MetaRecord {
	pub fn new(term: Term, voted_for: Option<[u8; 16]>, last_committed: Index, last_applied: Index) -> Self {
		let mut record = Self {
			magic: META_MAGIC,
			format_version: META_FORMAT_VERSION,
			term: term.get(),
			voted_for: voted_for.unwrap_or([0; 16]),
			last_committed_index: last_committed.get(),
			last_applied_index: last_applied.get(),
			checksum: 0,
		};
		record.checksum = record.compute_checksum();
		record
	}

	#[inline]
	pub fn term(&self) -> Term {
		Term(self.term)
	}

	#[inline]
	pub fn voted_for(&self) -> Option<[u8; 16]> {
		(self.voted_for != [0; 16]).then_some(self.voted_for)
	}

	#[inline]
	pub fn last_committed_index(&self) -> Index {
		Index(self.last_committed_index)
	}

	#[inline]
	pub fn last_applied_index(&self) -> Index {
		Index(self.last_applied_index)
	}

	fn compute_checksum(&self) -> u32 {
		let bytes = self.as_bytes();
		let without_checksum = &bytes[..bytes.len() - 4];
		crc32fast::hash(without_checksum)
	}

	pub fn validate(&self) -> Result<(), IntegrityError> {
		if self.magic != META_MAGIC {
			return Err(IntegrityError::BadMagic {
				expected: META_MAGIC,
				found: self.magic,
			});
		}
		if self.format_version != META_FORMAT_VERSION {
			return Err(IntegrityError::UnsupportedVersion {
				expected: META_FORMAT_VERSION,
				found: self.format_version,
			});
		}
		let expected = self.compute_checksum();
		if expected != self.checksum {
			return Err(IntegrityError::ChecksumMismatch {
				expected,
				found: self.checksum,
			});
		}
		Ok(())
	}
}

/// In-memory handle over the on-disk `metadata` file. Reads/writes are
/// in-place for an already-open [`IoTarget`] (used in tests and for the
/// anonymous-memory variant's backing buffer); [`MetadataStore::open`]
/// instead performs an atomic write-temp-then-rename-then-fsync-dir
/// replace for a real path, per the write-ahead ordering guarantee that
/// metadata persists only after the entries it references are durable.
pub struct MetadataFile<F: IoTarget> {
	record: MetaRecord,
	target: F,
}

impl<F: IoTarget> MetadataFile<F> {
	pub fn load(target: F) -> Result<Self, IntegrityError> {
		let mut buf: ViewBuf<MetaRecord> = ViewBuf::new();
		target.read_at(buf.as_bytes_mut(), 0).map_err(|_| IntegrityError::BadMagic {
			expected: META_MAGIC,
			found: [0; 4],
		})?;
		let record = *buf;
		record.validate()?;
		Ok(Self { record, target })
	}

	pub fn init(mut target: F) -> io::Result<Self> {
		let record = MetaRecord::new(Term::ZERO, None, Index::ZERO, Index::ZERO);
		target.set_len(0)?;
		target.write_at(record.as_bytes(), 0)?;
		Ok(Self { record, target })
	}

	#[inline]
	pub fn get(&self) -> &MetaRecord {
		&self.record
	}

	pub fn set(
		&mut self,
		term: Term,
		voted_for: Option<[u8; 16]>,
		last_committed: Index,
		last_applied: Index,
	) {
		self.record = MetaRecord::new(term, voted_for, last_committed, last_applied);
	}

	pub fn flush(&mut self) -> io::Result<()> {
		self.target.write_at(self.record.as_bytes(), 0)?;
		self.target.sync_all()
	}
}

/// Writes `record` to `path` via write-to-temp, rename, then fsync of
/// the parent directory, so a crash never leaves a half-written
/// metadata record in place.
pub fn atomic_write_metadata(path: impl AsRef<Path>, record: &MetaRecord) -> io::Result<()> {
	let path = path.as_ref();
	let parent = path.parent().unwrap_or_else(|| Path::new("."));
	let tmp_path: PathBuf = parent.join(format!(
		".{}.tmp",
		path.file_name().and_then(|n| n.to_str()).unwrap_or("metadata")
	));

	{
		let mut tmp = File::create(&tmp_path)?;
		IoTarget::write_at(&mut tmp, record.as_bytes(), 0)?;
		tmp.sync_all()?;
	}
	fs::rename(&tmp_path, path)?;

	if let Ok(dir) = File::open(parent) {
		let _ = dir.sync_all();
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn record_validates_after_construction() {
		let record = MetaRecord::new(Term(3), None, Index(10), Index(5));
		record.validate().unwrap();
	}

	#[test]
	fn corrupted_magic_fails_validation() {
		let mut record = MetaRecord::new(Term(1), None, Index(0), Index(0));
		record.magic = *b"XXXX";
		assert!(matches!(record.validate(), Err(IntegrityError::BadMagic { .. })));
	}

	#[test]
	fn tampered_checksum_fails_validation() {
		let mut record = MetaRecord::new(Term(1), None, Index(0), Index(0));
		record.last_committed_index = 999;
		assert!(matches!(record.validate(), Err(IntegrityError::ChecksumMismatch { .. })));
	}

	#[test]
	fn voted_for_roundtrips_through_vec_backing() {
		let mut file = MetadataFile::init(Vec::<u8>::new()).unwrap();
		file.set(Term(2), Some([9; 16]), Index(1), Index(0));
		file.flush().unwrap();

		let reloaded = MetadataFile::load(file.target.clone()).unwrap();
		assert_eq!(reloaded.get().voted_for(), Some([9; 16]));
		assert_eq!(reloaded.get().term(), Term(2));
	}

	#[test]
	fn atomic_write_then_load_from_real_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("metadata");
		let record = MetaRecord::new(Term(5), None, Index(100), Index(99));
		atomic_write_metadata(&path, &record).unwrap();

		let file = File::open(&path).unwrap();
		let loaded = MetadataFile::load(file).unwrap();
		assert_eq!(loaded.get().term(), Term(5));
		assert_eq!(loaded.get().last_committed_index(), Index(100));
	}
}
