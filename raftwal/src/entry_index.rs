use std::{collections::VecDeque, io};

use byte_view::{ByteView, ViewBuf};

use crate::{
	entry::IndexRecord,
	error::Error,
	id::Index,
	io::IoTarget,
};

/// Dense, append-only mapping from entry index to [`IndexRecord`],
/// backed by a flat file of fixed-width records plus an in-memory
/// mirror for O(1) lookup. `records[0]` corresponds to logical index
/// `base_index + 1`; `base_index` advances when [`truncate_prefix`] the logical
/// head of the log forward after compaction.
pub struct EntryIndex<F: IoTarget> {
	file: F,
	records: VecDeque<IndexRecord>,
	base_index: Index,
}

const RECORD_SIZE: usize = std::mem::size_of::<IndexRecord>();

impl<F: IoTarget> EntryIndex<F> {
	/// Loads an existing index file in full into memory.
	pub fn load(mut file: F) -> Result<Self, Error> {
		let mut records = VecDeque::new();
		let mut offset = 0u64;
		loop {
			let mut buf: ViewBuf<IndexRecord> = ViewBuf::new();
			let read = file.read_at(buf.as_bytes_mut(), offset).map_err(io_err(offset))?;
			if read < RECORD_SIZE {
				break;
			}
			records.push_back(*buf);
			offset += RECORD_SIZE as u64;
		}
		Ok(Self {
			file,
			records,
			base_index: Index::ZERO,
		})
	}

	pub fn init(mut file: F) -> Result<Self, Error> {
		file.set_len(0).map_err(io_err(0))?;
		Ok(Self {
			file,
			records: VecDeque::new(),
			base_index: Index::ZERO,
		})
	}

	/// The highest assigned entry index, or `base_index` if the index
	/// holds no records yet (the synthetic entry 0 is implicit and never
	/// stored here).
	pub fn last_entry(&self) -> Index {
		Index(self.base_index.get() + self.records.len() as u64)
	}

	pub fn base_index(&self) -> Index {
		self.base_index
	}

	/// Atomically assigns and appends the next index, durably writing
	/// the record to the file before it becomes visible to `lookup`.
	pub fn append(&mut self, record: IndexRecord) -> Result<Index, Error> {
		let index = self.last_entry().next();
		let offset = self.records.len() as u64 * RECORD_SIZE as u64;
		self.file.write_at(record.as_bytes(), offset).map_err(io_err(offset))?;
		self.records.push_back(record);
		Ok(index)
	}

	pub fn lookup(&self, index: Index) -> Option<&IndexRecord> {
		if index == Index::ZERO {
			return None;
		}
		let offset = index.get().checked_sub(self.base_index.get() + 1)?;
		self.records.get(offset as usize)
	}

	pub fn range(&self, from: Index, to: Index) -> impl Iterator<Item = (Index, &IndexRecord)> {
		let from = from.get().max(self.base_index.get() + 1);
		let to = to.get().min(self.last_entry().get());
		(from..=to).filter_map(move |i| self.lookup(Index(i)).map(|r| (Index(i), r)))
	}

	/// Drops records at and above `from_index_inclusive`; rejects this
	/// at the caller level if any of them is already committed.
	pub fn truncate_suffix(&mut self, from_index_inclusive: Index) -> Result<(), Error> {
		let Some(keep) = from_index_inclusive.get().checked_sub(self.base_index.get() + 1) else {
			return Ok(());
		};
		let keep = keep as usize;
		if keep >= self.records.len() {
			return Ok(());
		}
		self.records.truncate(keep);
		self.file
			.set_len(keep as u64 * RECORD_SIZE as u64)
			.map_err(io_err(0))?;
		Ok(())
	}

	/// Drops the applied prefix strictly below `below_index_exclusive`,
	/// advancing `base_index`. The backing file is left as-is; the
	/// orchestrator compacts it lazily the next time the index is
	/// rewritten, since a stale prefix on disk is harmless (it is never
	/// consulted once `base_index` has moved past it).
	pub fn truncate_prefix(&mut self, below_index_exclusive: Index) {
		while self.base_index.next() < below_index_exclusive && !self.records.is_empty() {
			self.records.pop_front();
			self.base_index = self.base_index.next();
		}
	}

	pub fn flush(&mut self) -> io::Result<()> {
		self.file.sync_all()
	}
}

fn io_err(offset: u64) -> impl Fn(io::Error) -> Error {
	move |source| Error::Io {
		path: std::path::PathBuf::from("index"),
		offset,
		source,
	}
}

#[cfg(test)]
mod tests {
	use crate::{address::Address, id::Term};

	use super::*;

	fn record(n: u64) -> IndexRecord {
		IndexRecord::new(Address(n * 100), 10, Term(n), n as i64, false)
	}

	#[test]
	fn append_assigns_contiguous_indices() {
		let mut index = EntryIndex::init(Vec::<u8>::new()).unwrap();
		assert_eq!(index.append(record(1)).unwrap(), Index(1));
		assert_eq!(index.append(record(2)).unwrap(), Index(2));
		assert_eq!(index.last_entry(), Index(2));
	}

	#[test]
	fn lookup_out_of_range_is_none() {
		let index = EntryIndex::init(Vec::<u8>::new()).unwrap();
		assert!(index.lookup(Index(1)).is_none());
		assert!(index.lookup(Index::ZERO).is_none());
	}

	#[test]
	fn range_iterates_inclusive() {
		let mut index = EntryIndex::init(Vec::<u8>::new()).unwrap();
		for n in 1..=5 {
			index.append(record(n)).unwrap();
		}
		let found: Vec<Index> = index.range(Index(2), Index(4)).map(|(i, _)| i).collect();
		assert_eq!(found, vec![Index(2), Index(3), Index(4)]);
	}

	#[test]
	fn truncate_suffix_drops_tail_and_shrinks_file() {
		let mut index = EntryIndex::init(Vec::<u8>::new()).unwrap();
		for n in 1..=5 {
			index.append(record(n)).unwrap();
		}
		index.truncate_suffix(Index(3)).unwrap();
		assert_eq!(index.last_entry(), Index(2));
		assert!(index.lookup(Index(3)).is_none());
	}

	#[test]
	fn truncate_prefix_advances_base_index() {
		let mut index = EntryIndex::init(Vec::<u8>::new()).unwrap();
		for n in 1..=5 {
			index.append(record(n)).unwrap();
		}
		index.truncate_prefix(Index(3));
		assert_eq!(index.base_index(), Index(2));
		assert!(index.lookup(Index(2)).is_none());
		assert!(index.lookup(Index(3)).is_some());
	}

	#[test]
	fn reload_from_file_reconstructs_records() {
		let backing = {
			let mut index = EntryIndex::init(Vec::<u8>::new()).unwrap();
			index.append(record(1)).unwrap();
			index.append(record(2)).unwrap();
			index.file
		};
		let reloaded = EntryIndex::load(backing).unwrap();
		assert_eq!(reloaded.last_entry(), Index(2));
		assert_eq!(reloaded.lookup(Index(1)).unwrap().term(), Term(1));
	}
}
