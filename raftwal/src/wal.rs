use std::{
	collections::HashMap,
	fs::OpenOptions,
	path::Path,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
	address::Address,
	address_space::AddressSpace,
	apply::{ApplyLoop, ApplySource},
	clock::{Clock, SystemClock},
	dir::WalDir,
	entry::{Context, Entry, IndexRecord},
	entry_index::EntryIndex,
	error::{Error, OpenError},
	id::{Index, Term},
	lock::{LockManager, Mode},
	metadata::{atomic_write_metadata, MetaRecord, MetadataFile},
	options::{FlushInterval, MemoryManagement, WalOptions},
	page::{PageManager, PageManagerImpl},
	state_machine::StateMachine,
	watermark::Watermarks,
};

/// Read-only snapshot of a log's position and health, for observability.
/// Not part of the durable contract; grounded on the teacher's
/// `PageCache::num_dirty`/`segment_nums`-style read accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalStats {
	pub last_entry: Index,
	pub last_committed: Index,
	pub last_applied: Index,
	pub poisoned: bool,
}

/// Shared state behind the public [`WriteAheadLog`] handle. Split out so
/// the apply loop's [`ApplySource`] impl and the foreground API operate
/// on the same `Arc`-shared data without the loop owning a whole
/// `WriteAheadLog`.
struct Inner {
	dir: WalDir,
	options: WalOptions,
	address_space: AddressSpace,
	entry_index: RwLock<EntryIndex<std::fs::File>>,
	metadata: Mutex<MetaRecord>,
	context: Mutex<HashMap<Index, Context>>,
	locks: Arc<LockManager>,
	watermarks: Arc<Watermarks>,
	clock: Arc<dyn Clock>,
	disposed: AtomicBool,
}

impl Inner {
	/// Address one past the last byte of the most recently appended
	/// entry; the offset new appends are written at.
	fn tail_address(&self) -> Address {
		Self::tail_address_of(&self.entry_index.read())
	}

	/// Same computation, but against an already-held guard, so callers
	/// that are mid-append (holding the write guard) don't try to
	/// re-acquire the (non-reentrant) `entry_index` lock.
	fn tail_address_of(entry_index: &EntryIndex<std::fs::File>) -> Address {
		let last_entry = entry_index.last_entry();
		let Some(record) = entry_index.lookup(last_entry) else {
			return Address::ZERO;
		};
		record
			.address()
			.checked_add(record.length as u64)
			.expect("address space overflow")
	}

	fn decode(&self, record: &IndexRecord) -> Result<Entry, Error> {
		let bytes = self.address_space.read_range(record.address(), record.length as u64)?;
		Ok(Entry {
			term: record.term(),
			timestamp_nanos: record.timestamp_nanos,
			payload: bytes.into_boxed_slice(),
			is_snapshot: record.is_snapshot(),
		})
	}

	/// Makes every entry written so far and the current metadata record
	/// durable, in write-ahead order: payload bytes, then the page
	/// flush, then the metadata rewrite. Caller must already hold a
	/// lock that excludes concurrent appends (`Write` or stronger).
	fn flush_raw(&self) -> Result<(), Error> {
		let tail = self.tail_address();
		self.address_space.flush(Address::ZERO, tail.get())?;
		self.entry_index.write().flush().map_err(|source| Error::Io {
			path: self.dir.index_file(),
			offset: 0,
			source,
		})?;
		let record = *self.metadata.lock();
		atomic_write_metadata(self.dir.metadata_file(), &record).map_err(|source| Error::Io {
			path: self.dir.metadata_file(),
			offset: 0,
			source,
		})?;
		Ok(())
	}

	fn check_open(&self) -> Result<(), Error> {
		if self.disposed.load(Ordering::Acquire) {
			return Err(Error::Disposed);
		}
		if self.watermarks.is_poisoned() {
			return Err(Error::Poisoned);
		}
		Ok(())
	}

	fn poison_on_err<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
		if result.is_err() {
			self.watermarks.poison();
		}
		result
	}
}

#[async_trait::async_trait]
impl ApplySource for Inner {
	fn read_entry(&self, index: Index) -> Result<Entry, Error> {
		let record = {
			let entry_index = self.entry_index.read();
			*entry_index.lookup(index).ok_or(Error::OutOfRange {
				index,
				last_entry: entry_index.last_entry(),
			})?
		};
		self.decode(&record)
	}

	fn take_context(&self, index: Index) -> Option<Context> {
		self.context.lock().remove(&index)
	}
}

/// The orchestrator: durable, crash-safe storage of an ordered sequence
/// of log entries, serving concurrent readers against a single
/// appender, and exactly-once delivery of committed entries to an
/// external state machine.
///
/// Cheap to clone-share via the internal `Arc`; `WriteAheadLog` itself
/// owns the background apply/auto-flush tasks and is the handle callers
/// keep, the way the teacher's top-level `Storage` is.
pub struct WriteAheadLog {
	inner: Arc<Inner>,
	cancel: CancellationToken,
	apply_handle: Mutex<Option<JoinHandle<()>>>,
	flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WriteAheadLog {
	/// Opens (or initializes, if empty) a log rooted at `path`, using
	/// the system wall clock for entry timestamps.
	pub fn open(path: impl AsRef<Path>, options: WalOptions) -> Result<Self, OpenError> {
		Self::open_with_clock(path, options, Arc::new(SystemClock))
	}

	pub fn open_with_clock(
		path: impl AsRef<Path>,
		options: WalOptions,
		clock: Arc<dyn Clock>,
	) -> Result<Self, OpenError> {
		options.validate()?;
		let path = path.as_ref();
		if !path.exists() {
			return Err(OpenError::NoSuchDir(path.to_path_buf()));
		}
		if !path.is_dir() {
			return Err(OpenError::NotADirectory(path.to_path_buf()));
		}
		let dir = WalDir::new(path.to_path_buf());

		let metadata_record = {
			let file = OpenOptions::new()
				.read(true)
				.write(true)
				.create(true)
				.open(dir.metadata_file())
				.map_err(OpenError::Io)?;
			let len = file.metadata().map_err(OpenError::Io)?.len();
			if len == 0 {
				*MetadataFile::init(file).map_err(OpenError::Io)?.get()
			} else {
				*MetadataFile::load(file)?.get()
			}
		};

		let entry_index = {
			let file = OpenOptions::new()
				.read(true)
				.write(true)
				.create(true)
				.open(dir.index_file())
				.map_err(OpenError::Io)?;
			let len = file.metadata().map_err(OpenError::Io)?.len();
			if len == 0 {
				EntryIndex::init(file).map_err(|err| OpenError::ReadIndex(into_io_error(err)))?
			} else {
				EntryIndex::load(file).map_err(|err| OpenError::ReadIndex(into_io_error(err)))?
			}
		};

		let pages = match options.memory_management {
			MemoryManagement::SharedMemory => {
				PageManagerImpl::open_mmap(dir.root(), options.page_size).map_err(|err| OpenError::Io(into_io_error(err)))?
			}
			MemoryManagement::PrivateMemory { cache_capacity } => {
				PageManagerImpl::open_anon(dir.root(), options.page_size, cache_capacity)
					.map_err(|err| OpenError::Io(into_io_error(err)))?
			}
		};
		let address_space = AddressSpace::new(pages);

		let last_entry = entry_index.last_entry();
		let last_committed = Index(metadata_record.last_committed_index().get().min(last_entry.get()));
		let last_applied = Index(metadata_record.last_applied_index().get().min(last_committed.get()));

		let inner = Arc::new(Inner {
			dir,
			options,
			address_space,
			entry_index: RwLock::new(entry_index),
			metadata: Mutex::new(metadata_record),
			context: Mutex::new(HashMap::new()),
			locks: Arc::new(LockManager::new()),
			watermarks: Arc::new(Watermarks::new(last_entry, last_committed, last_applied)),
			clock,
			disposed: AtomicBool::new(false),
		});

		let cancel = CancellationToken::new();
		let flush_handle = match inner.options.flush_interval {
			FlushInterval::Every(interval) => Mutex::new(Some(spawn_auto_flush(
				Arc::clone(&inner),
				interval,
				cancel.clone(),
			))),
			FlushInterval::Never | FlushInterval::Zero => Mutex::new(None),
		};

		Ok(Self {
			inner,
			cancel,
			apply_handle: Mutex::new(None),
			flush_handle,
		})
	}

	/// Spawns the background apply loop against `state_machine`. A
	/// second call replaces the previous loop, cancelling it first.
	pub fn start_apply_loop(&self, state_machine: Arc<dyn StateMachine>) {
		let loop_ = ApplyLoop::new(
			Arc::clone(&self.inner),
			state_machine,
			Arc::clone(&self.inner.locks),
			Arc::clone(&self.inner.watermarks),
		);
		let handle = loop_.spawn(self.cancel.child_token());
		let mut slot = self.apply_handle.lock();
		if let Some(previous) = slot.take() {
			previous.abort();
		}
		*slot = Some(handle);
	}

	/// Assigns `index = last_entry + 1`, writes `payload` into the tail
	/// of the address space, and durably indexes it. `context`, if
	/// given, is held in-memory and delivered to the state machine at
	/// apply time; it is never persisted.
	pub async fn append(
		&self,
		term: Term,
		payload: impl Into<Box<[u8]>>,
		context: Option<Context>,
		cancel: &CancellationToken,
	) -> Result<Index, Error> {
		self.inner.check_open()?;
		let _guard = self.inner.locks.acquire(Mode::Write, cancel).await?;
		self.append_locked(term, payload.into(), context)
	}

	fn append_locked(&self, term: Term, payload: Box<[u8]>, context: Option<Context>) -> Result<Index, Error> {
		let result = (|| {
			let mut entry_index = self.inner.entry_index.write();
			let index = entry_index.last_entry().next();
			let address = Inner::tail_address_of(&entry_index);
			self.inner.address_space.write_range(address, &payload)?;
			let timestamp = self.inner.clock.now_wall_nanos();
			let record = IndexRecord::new(address, payload.len() as u32, term, timestamp, false);
			entry_index.append(record)?;
			self.inner.watermarks.set_last_entry(index);
			Ok(index)
		})();
		let index = self.inner.poison_on_err(result)?;
		if let Some(ctx) = context {
			self.inner.context.lock().insert(index, ctx);
		}
		Ok(index)
	}

	/// Appends `entries` starting at `start_index`, truncating any
	/// uncommitted suffix at or above `start_index` first. Rejects
	/// overwriting a committed index and rejects leaving a gap ahead of
	/// the current tail.
	pub async fn append_range(
		&self,
		entries: Vec<(Term, Box<[u8]>)>,
		start_index: Index,
		cancel: &CancellationToken,
	) -> Result<Index, Error> {
		self.inner.check_open()?;
		let _guard = self.inner.locks.acquire(Mode::Write, cancel).await?;

		let last_committed = self.inner.watermarks.last_committed();
		if start_index <= last_committed {
			return Err(Error::OverwriteCommitted {
				index: start_index,
				last_committed,
			});
		}
		let last_entry = self.inner.watermarks.last_entry();
		if start_index > last_entry.next() {
			return Err(Error::NonContiguousAppend {
				start_index,
				expected: last_entry.next(),
			});
		}
		if start_index <= last_entry {
			let mut entry_index = self.inner.entry_index.write();
			entry_index.truncate_suffix(start_index)?;
			self.inner.watermarks.set_last_entry(entry_index.last_entry());
			drop(entry_index);
			self.inner.context.lock().retain(|idx, _| *idx < start_index);
		}

		let mut last_appended = start_index.checked_prev().unwrap_or(Index::ZERO);
		for (term, payload) in entries {
			last_appended = self.append_locked(term, payload, None)?;
		}
		Ok(last_appended)
	}

	/// Reads entries `[from..=to]` (or the open range up to the current
	/// tail if `to > last_entry`). `from == 0` includes the synthetic,
	/// always-present, never-applied entry 0. `strong` requests a
	/// `StrongRead` lock, for callers that need the read to be
	/// consistent with the commit boundary rather than just the append
	/// boundary.
	pub async fn read(
		&self,
		from: Index,
		to: Index,
		strong: bool,
		cancel: &CancellationToken,
	) -> Result<Vec<(Index, Entry)>, Error> {
		self.inner.check_open()?;
		let mode = if strong { Mode::StrongRead } else { Mode::WeakRead };
		let _guard = self.inner.locks.acquire(mode, cancel).await?;

		let last_entry = self.inner.watermarks.last_entry();
		if from > Index::ZERO && from > last_entry {
			return Err(Error::OutOfRange { index: from, last_entry });
		}

		let mut out = Vec::new();
		if from == Index::ZERO {
			out.push((Index::ZERO, Entry::new(Term::ZERO, 0, Vec::new())));
		}
		let entry_index = self.inner.entry_index.read();
		for (index, record) in entry_index.range(from.max(Index(1)), to) {
			out.push((index, self.inner.decode(record)?));
		}
		Ok(out)
	}

	/// Cheap membership check: does entry `index` exist with exactly
	/// `term`? Used by Raft consistency checks (`AppendEntries`) without
	/// paying for a full decode.
	pub fn has(&self, index: Index, term: Term) -> bool {
		if index == Index::ZERO {
			return term == Term::ZERO;
		}
		self.inner
			.entry_index
			.read()
			.lookup(index)
			.map(|record| record.term() == term)
			.unwrap_or(false)
	}

	/// Advances `last_committed` to `min(up_to_index, last_entry)`,
	/// flushing every entry up to the new watermark before persisting
	/// the metadata record (payload → flush → metadata → fsync).
	/// Returns the number of newly committed entries.
	pub async fn commit(&self, up_to_index: Index, cancel: &CancellationToken) -> Result<u64, Error> {
		self.inner.check_open()?;
		let _guard = self.inner.locks.acquire(Mode::Write, cancel).await?;

		let last_entry = self.inner.watermarks.last_entry();
		let target = Index(up_to_index.get().min(last_entry.get()));
		let current = self.inner.watermarks.last_committed();
		if target <= current {
			return Ok(0);
		}

		let result = (|| {
			let tail = self.inner.tail_address();
			self.inner.address_space.flush(Address::ZERO, tail.get())?;

			let (term, voted_for, last_applied) = {
				let meta = self.inner.metadata.lock();
				(meta.term(), meta.voted_for(), meta.last_applied_index())
			};
			let record = MetaRecord::new(term, voted_for, target, last_applied);
			atomic_write_metadata(self.inner.dir.metadata_file(), &record).map_err(|source| Error::Io {
				path: self.inner.dir.metadata_file(),
				offset: 0,
				source,
			})?;
			*self.inner.metadata.lock() = record;
			Ok(())
		})();
		self.inner.poison_on_err(result)?;

		self.inner.watermarks.advance_committed(target);
		Ok(target.get() - current.get())
	}

	/// Persists `term`/`voted_for` immediately, independent of any
	/// commit, for Raft voter-state durability (e.g. before replying to
	/// a vote request).
	pub async fn persist_voter_state(
		&self,
		term: Term,
		voted_for: Option<[u8; 16]>,
		cancel: &CancellationToken,
	) -> Result<(), Error> {
		self.inner.check_open()?;
		let _guard = self.inner.locks.acquire(Mode::Write, cancel).await?;
		let (last_committed, last_applied) = {
			let meta = self.inner.metadata.lock();
			(meta.last_committed_index(), meta.last_applied_index())
		};
		let record = MetaRecord::new(term, voted_for, last_committed, last_applied);
		let result = atomic_write_metadata(self.inner.dir.metadata_file(), &record).map_err(|source| Error::Io {
			path: self.inner.dir.metadata_file(),
			offset: 0,
			source,
		});
		self.inner.poison_on_err(result)?;
		*self.inner.metadata.lock() = record;
		Ok(())
	}

	pub fn current_term(&self) -> Term {
		self.inner.metadata.lock().term()
	}

	pub fn voted_for(&self) -> Option<[u8; 16]> {
		self.inner.metadata.lock().voted_for()
	}

	/// Suspends until `last_applied >= index` or the log is poisoned;
	/// also unblocks on `cancel`. A wake on poisoning without having
	/// reached `index` surfaces as `Error::Poisoned`, never a false
	/// `Ok(())`.
	pub async fn wait_for_apply(&self, index: Index, cancel: &CancellationToken) -> Result<(), Error> {
		tokio::select! {
			_ = cancel.cancelled() => Err(Error::Cancelled),
			_ = self.inner.watermarks.wait_for_apply(index) => {
				if self.inner.watermarks.last_applied() >= index {
					Ok(())
				} else {
					Err(Error::Poisoned)
				}
			}
		}
	}

	/// Forces page and metadata durability. Safe to call concurrently
	/// with readers; serialized against other flushes and appends by
	/// the `Write` lock.
	pub async fn flush(&self, cancel: &CancellationToken) -> Result<(), Error> {
		self.inner.check_open()?;
		let _guard = self.inner.locks.acquire(Mode::Write, cancel).await?;
		let result = self.inner.flush_raw();
		self.inner.poison_on_err(result)
	}

	/// Truncates the uncommitted suffix from `from_index` under an
	/// `Exclusive` lock. Rejects truncating anything at or below
	/// `last_committed`, the same `Error::OverwriteCommitted` guard
	/// [`append_range`][Self::append_range] applies, since dropping a
	/// committed entry would leave `last_committed > last_entry`. If
	/// `reuse_space`, the underlying pages are left in place for the next
	/// append to overwrite; page reclamation above the new tail otherwise
	/// only happens lazily, the next time [`compact`][Self::compact]
	/// runs, since [`PageManager`][crate::page::PageManager] only exposes
	/// a lower-bound delete.
	pub async fn drop_from(
		&self,
		from_index: Index,
		reuse_space: bool,
		cancel: &CancellationToken,
	) -> Result<u64, Error> {
		self.inner.check_open()?;
		let _guard = self.inner.locks.acquire(Mode::Exclusive, cancel).await?;
		let _ = reuse_space;

		let last_committed = self.inner.watermarks.last_committed();
		if from_index <= last_committed {
			return Err(Error::OverwriteCommitted {
				index: from_index,
				last_committed,
			});
		}
		let last_entry = self.inner.watermarks.last_entry();
		if from_index > last_entry {
			return Ok(0);
		}
		let dropped = last_entry.get() - from_index.get() + 1;

		let mut entry_index = self.inner.entry_index.write();
		entry_index.truncate_suffix(from_index)?;
		self.inner.watermarks.set_last_entry(entry_index.last_entry());
		drop(entry_index);
		self.inner.context.lock().retain(|idx, _| *idx < from_index);
		Ok(dropped)
	}

	/// Reclaims pages and index records strictly below
	/// `min(last_applied, last_committed)`. Requires `Compaction` rights,
	/// which exclude other writers and `StrongRead` but not `WeakRead`.
	pub async fn compact(&self, cancel: &CancellationToken) -> Result<u64, Error> {
		self.inner.check_open()?;
		let _guard = self.inner.locks.acquire(Mode::Compaction, cancel).await?;

		let boundary = Index(
			self.inner
				.watermarks
				.last_applied()
				.get()
				.min(self.inner.watermarks.last_committed().get()),
		);
		if boundary == Index::ZERO {
			return Ok(0);
		}

		let (dropped_entries, upper_exclusive) = {
			let mut entry_index = self.inner.entry_index.write();
			let before = entry_index.base_index();
			entry_index.truncate_prefix(boundary.next());
			let after = entry_index.base_index();
			// If nothing survives the prefix drop, fall back to the tail: every
			// page strictly before the next append's address is reclaimable.
			let upper_exclusive = match entry_index.lookup(after.next()) {
				Some(record) => record.address().split(self.inner.address_space.page_size()).0,
				None => Inner::tail_address_of(&entry_index).split(self.inner.address_space.page_size()).0,
			};
			(after.get() - before.get(), upper_exclusive)
		};
		let pages_deleted = self.inner.address_space.pages().delete_pages_below(upper_exclusive)?;
		log::debug!("compaction dropped {dropped_entries} entries and {pages_deleted} pages");
		Ok(dropped_entries)
	}

	pub fn is_poisoned(&self) -> bool {
		self.inner.watermarks.is_poisoned()
	}

	pub fn is_disposed(&self) -> bool {
		self.inner.disposed.load(Ordering::Acquire)
	}

	pub fn stats(&self) -> WalStats {
		WalStats {
			last_entry: self.inner.watermarks.last_entry(),
			last_committed: self.inner.watermarks.last_committed(),
			last_applied: self.inner.watermarks.last_applied(),
			poisoned: self.inner.watermarks.is_poisoned(),
		}
	}

	/// Flushes outstanding writes, stops the apply and auto-flush tasks,
	/// and marks the log disposed; further operations return
	/// [`Error::Disposed`].
	pub async fn close(&self, cancel: &CancellationToken) -> Result<(), Error> {
		if self.inner.disposed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		let result = async {
			let _guard = self.inner.locks.acquire(Mode::Exclusive, cancel).await?;
			self.inner.flush_raw()
		}
		.await;
		self.cancel.cancel();
		if let Some(handle) = self.apply_handle.lock().take() {
			let _ = handle.await;
		}
		if let Some(handle) = self.flush_handle.lock().take() {
			let _ = handle.await;
		}
		result
	}
}

impl Drop for WriteAheadLog {
	fn drop(&mut self) {
		self.cancel.cancel();
		if !self.inner.disposed.swap(true, Ordering::AcqRel) {
			if let Err(err) = self.inner.flush_raw() {
				log::error!("failed to flush WAL on drop: {err}");
			}
		}
	}
}

fn spawn_auto_flush(inner: Arc<Inner>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		loop {
			tokio::select! {
				_ = cancel.cancelled() => return,
				_ = ticker.tick() => {}
			}
			if inner.watermarks.is_poisoned() {
				return;
			}
			let Ok(_guard) = inner.locks.acquire(Mode::Write, &cancel).await else {
				return;
			};
			if let Err(err) = inner.flush_raw() {
				log::error!("background flush failed: {err}; poisoning log");
				inner.watermarks.poison();
				return;
			}
		}
	})
}

fn into_io_error(err: Error) -> std::io::Error {
	match err {
		Error::Io { source, .. } => source,
		other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicI64, Ordering as AtomicOrdering},
		Arc,
	};

	use tempfile::tempdir;

	use super::*;
	use crate::clock::Clock;

	struct FixedClock(AtomicI64);

	impl Clock for FixedClock {
		fn now_wall_nanos(&self) -> i64 {
			self.0.fetch_add(1, AtomicOrdering::SeqCst)
		}

		fn now_monotonic(&self) -> std::time::Instant {
			std::time::Instant::now()
		}
	}

	fn open(dir: &Path) -> WriteAheadLog {
		WriteAheadLog::open_with_clock(dir, WalOptions::default().with_page_size(4096), Arc::new(FixedClock(AtomicI64::new(0))))
			.unwrap()
	}

	#[tokio::test]
	async fn fresh_append_commit_apply() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();

		let index = wal
			.append(Term(42), b"SET X=0".to_vec(), None, &cancel)
			.await
			.unwrap();
		assert_eq!(index, Index(1));

		let mut mock = crate::state_machine::MockStateMachine::new();
		mock.expect_apply().times(1).returning(|_, entry, _| {
			assert_eq!(&*entry.payload, b"SET X=0");
			Ok(())
		});
		mock.expect_snapshot_index().return_const(Index::ZERO);
		wal.start_apply_loop(Arc::new(mock));

		wal.commit(Index(1), &cancel).await.unwrap();
		wal.wait_for_apply(Index(1), &cancel).await.unwrap();

		let stats = wal.stats();
		assert_eq!(stats.last_entry, Index(1));
		assert_eq!(stats.last_committed, Index(1));
		assert_eq!(stats.last_applied, Index(1));
	}

	#[tokio::test]
	async fn overwrite_uncommitted_suffix() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();

		for term in 42..47 {
			wal.append(Term(term), vec![term as u8], None, &cancel).await.unwrap();
		}
		wal.append_range(vec![(Term(99), Box::from(&[1u8][..]))], Index(1), &cancel)
			.await
			.unwrap();

		assert_eq!(wal.stats().last_entry, Index(1));
		let read = wal.read(Index(1), Index(1), false, &cancel).await.unwrap();
		assert_eq!(read[0].1.term, Term(99));
		assert!(wal.read(Index(2), Index(2), false, &cancel).await.is_err());
	}

	#[tokio::test]
	async fn reject_overwrite_of_committed() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();

		for term in 0..5 {
			wal.append(Term(term), vec![term as u8], None, &cancel).await.unwrap();
		}
		wal.commit(Index(3), &cancel).await.unwrap();

		let err = wal
			.append_range(vec![(Term(1), Box::from(&[9u8][..]))], Index(2), &cancel)
			.await
			.unwrap_err();
		assert!(matches!(err, Error::OverwriteCommitted { .. }));
		assert_eq!(wal.stats().last_entry, Index(5));
	}

	#[tokio::test]
	async fn restart_after_commit_replays_sum() {
		use std::sync::atomic::AtomicU64;

		let dir = tempdir().unwrap();
		{
			let wal = open(dir.path());
			let cancel = CancellationToken::new();
			for i in 0u64..1000 {
				wal.append(Term(1), i.to_le_bytes().to_vec(), None, &cancel).await.unwrap();
			}
			wal.commit(Index(1000), &cancel).await.unwrap();
			wal.flush(&cancel).await.unwrap();
		}

		let wal = open(dir.path());
		assert_eq!(wal.stats().last_committed, Index(1000));

		let sum = Arc::new(AtomicU64::new(0));
		let mut mock = crate::state_machine::MockStateMachine::new();
		{
			let sum = Arc::clone(&sum);
			mock.expect_apply().returning(move |_, entry, _| {
				let bytes: [u8; 8] = entry.payload[..8].try_into().unwrap();
				sum.fetch_add(u64::from_le_bytes(bytes), AtomicOrdering::SeqCst);
				Ok(())
			});
		}
		mock.expect_snapshot_index().return_const(Index::ZERO);
		wal.start_apply_loop(Arc::new(mock));

		let cancel = CancellationToken::new();
		wal.wait_for_apply(Index(1000), &cancel).await.unwrap();
		assert_eq!(sum.load(AtomicOrdering::SeqCst), 1000 * 999 / 2);
	}

	#[tokio::test]
	async fn large_entry_spans_pages() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();

		let payload = vec![7u8; 9000];
		wal.append(Term(1), payload.clone(), None, &cancel).await.unwrap();
		wal.commit(Index(1), &cancel).await.unwrap();

		let read = wal.read(Index(1), Index(1), false, &cancel).await.unwrap();
		assert_eq!(&*read[0].1.payload, &payload[..]);
	}

	#[tokio::test]
	async fn concurrent_read_during_append() {
		let dir = tempdir().unwrap();
		let wal = Arc::new(open(dir.path()));
		let cancel = CancellationToken::new();

		for term in 0..5 {
			wal.append(Term(term), vec![term as u8], None, &cancel).await.unwrap();
		}
		let read = wal.read(Index(1), Index(5), false, &cancel).await.unwrap();
		assert_eq!(read.len(), 5);

		wal.append(Term(6), vec![6], None, &cancel).await.unwrap();
		let read = wal.read(Index(1), Index(6), false, &cancel).await.unwrap();
		assert_eq!(read.len(), 6);
	}

	#[tokio::test]
	async fn drop_with_from_one_empties_the_log() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();
		for term in 0..3 {
			wal.append(Term(term), vec![term as u8], None, &cancel).await.unwrap();
		}
		let dropped = wal.drop_from(Index(1), true, &cancel).await.unwrap();
		assert_eq!(dropped, 3);
		assert_eq!(wal.stats().last_entry, Index::ZERO);
	}

	#[tokio::test]
	async fn drop_from_rejects_truncating_committed_entries() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();
		for term in 0..5 {
			wal.append(Term(term), vec![term as u8], None, &cancel).await.unwrap();
		}
		wal.commit(Index(3), &cancel).await.unwrap();

		let err = wal.drop_from(Index(2), true, &cancel).await.unwrap_err();
		assert!(matches!(err, Error::OverwriteCommitted { .. }));
		assert_eq!(wal.stats().last_entry, Index(5));

		let dropped = wal.drop_from(Index(4), true, &cancel).await.unwrap();
		assert_eq!(dropped, 2);
		assert_eq!(wal.stats().last_entry, Index(3));
	}

	#[tokio::test]
	async fn wait_for_apply_surfaces_poisoned_instead_of_false_success() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();
		wal.append(Term(1), vec![1], None, &cancel).await.unwrap();
		wal.commit(Index(1), &cancel).await.unwrap();

		let mut mock = crate::state_machine::MockStateMachine::new();
		mock.expect_apply().returning(|_, _, _| Err("boom".to_string()));
		mock.expect_snapshot_index().return_const(Index::ZERO);
		wal.start_apply_loop(Arc::new(mock));

		let err = wal.wait_for_apply(Index(1), &cancel).await.unwrap_err();
		assert!(matches!(err, Error::Poisoned));
	}

	#[tokio::test]
	async fn has_checks_term_without_decoding_payload() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();
		wal.append(Term(7), vec![1, 2, 3], None, &cancel).await.unwrap();
		assert!(wal.has(Index(1), Term(7)));
		assert!(!wal.has(Index(1), Term(8)));
		assert!(wal.has(Index::ZERO, Term::ZERO));
	}

	#[tokio::test]
	async fn disposed_log_rejects_further_appends() {
		let dir = tempdir().unwrap();
		let wal = open(dir.path());
		let cancel = CancellationToken::new();
		wal.close(&cancel).await.unwrap();
		let err = wal.append(Term(1), vec![1], None, &cancel).await.unwrap_err();
		assert!(matches!(err, Error::Disposed));
	}
}
