use std::{
	collections::{HashMap, VecDeque},
	sync::atomic::{AtomicU64, Ordering},
	time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// The six acquisition modes coordinating append, read, commit, apply
/// and flush against the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
	/// Multiple readers; compatible with one writer. Readers see the
	/// prefix up to `last_entry` at acquisition time.
	WeakRead,
	/// Blocks writers; used when a read must be consistent with commit
	/// boundaries.
	StrongRead,
	/// Exclusive among writers; compatible with `WeakRead`.
	Write,
	/// Exclusive among writers and `StrongRead`; compatible with
	/// `WeakRead`.
	Compaction,
	/// Excludes every other mode; used by drop and dispose.
	Exclusive,
	/// A pseudo-acquisition that never occupies a held slot itself; it
	/// completes once all currently-held read locks have drained,
	/// ahead of it in FIFO order.
	ReadBarrier,
}

/// True if a single held instance of `held` permits granting `requested`
/// concurrently. `ReadBarrier` is handled outside this table since it
/// never occupies a held slot (see [`LockManager`]'s wake loop).
fn compatible(held: Mode, requested: Mode) -> bool {
	use Mode::*;
	match (held, requested) {
		(Exclusive, _) | (_, Exclusive) => false,
		(_, ReadBarrier) => !matches!(held, WeakRead | StrongRead),
		(ReadBarrier, _) => unreachable!("ReadBarrier is never held"),
		(WeakRead, _) => true,
		(StrongRead, WeakRead | StrongRead) => true,
		(StrongRead, Write | Compaction) => false,
		(Write, WeakRead) => true,
		(Write, Compaction) => true,
		(Write, StrongRead | Write) => false,
		(Compaction, WeakRead | Write) => true,
		(Compaction, StrongRead | Compaction) => false,
	}
}

struct QueueEntry {
	id: u64,
	mode: Mode,
	waker: oneshot::Sender<()>,
}

struct State {
	held: HashMap<Mode, u32>,
	queue: VecDeque<QueueEntry>,
}

impl State {
	fn reader_count(&self) -> u32 {
		self.held.get(&Mode::WeakRead).copied().unwrap_or(0)
			+ self.held.get(&Mode::StrongRead).copied().unwrap_or(0)
	}

	fn can_grant(&self, mode: Mode) -> bool {
		if mode == Mode::ReadBarrier {
			return self.reader_count() == 0;
		}
		self.held.keys().all(|&held_mode| compatible(held_mode, mode))
	}

	fn insert(&mut self, mode: Mode) {
		*self.held.entry(mode).or_insert(0) += 1;
	}

	fn remove(&mut self, mode: Mode) {
		if let Some(count) = self.held.get_mut(&mode) {
			*count -= 1;
			if *count == 0 {
				self.held.remove(&mode);
			}
		}
	}

	/// Grants the longest prefix of the queue compatible with the
	/// current held set, in order. Stops at the first entry that can't
	/// yet be granted, so later-arriving-but-compatible requests never
	/// jump the queue ahead of an earlier blocked one.
	fn wake_compatible_prefix(&mut self) {
		while let Some(front) = self.queue.front() {
			if !self.can_grant(front.mode) {
				break;
			}
			let entry = self.queue.pop_front().unwrap();
			if entry.mode != Mode::ReadBarrier {
				self.insert(entry.mode);
			}
			// Ignore send errors: the waiter gave up (cancelled) and
			// will release nothing since it never observes the grant.
			let _ = entry.waker.send(());
		}
	}
}

/// FIFO-fair, cancellable, multi-mode lock guarding append, read,
/// commit, apply and flush against a single WAL instance.
pub struct LockManager {
	state: Mutex<State>,
	next_id: AtomicU64,
}

/// An acquired lock. Releasing happens on drop; holding it across an
/// `.await` is expected and safe since the internal state is a
/// synchronous `parking_lot::Mutex`, never held across a suspension
/// point itself.
pub struct LockGuard<'a> {
	manager: &'a LockManager,
	mode: Mode,
}

impl<'a> Drop for LockGuard<'a> {
	fn drop(&mut self) {
		let mut state = self.manager.state.lock();
		state.remove(self.mode);
		state.wake_compatible_prefix();
	}
}

impl LockManager {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(State {
				held: HashMap::new(),
				queue: VecDeque::new(),
			}),
			next_id: AtomicU64::new(0),
		}
	}

	/// Acquires `mode`, suspending until it can be granted or
	/// `cancel` fires. On cancellation, any partially-queued request is
	/// removed and no lock is held.
	pub async fn acquire(&self, mode: Mode, cancel: &CancellationToken) -> Result<LockGuard<'_>, Error> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let rx = {
			let mut state = self.state.lock();
			if state.queue.is_empty() && state.can_grant(mode) {
				if mode != Mode::ReadBarrier {
					state.insert(mode);
				}
				return Ok(LockGuard { manager: self, mode });
			}
			let (tx, rx) = oneshot::channel();
			state.queue.push_back(QueueEntry { id, mode, waker: tx });
			rx
		};

		tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				let mut state = self.state.lock();
				let was_pending = state.queue.iter().position(|e| e.id == id);
				if let Some(pos) = was_pending {
					state.queue.remove(pos);
					return Err(Error::Cancelled);
				}
				// Lost the race: the entry was already granted. Drain
				// the channel and release immediately to stay
				// consistent with "cancel leaves watermarks unchanged".
				drop(state);
				if rx.await.is_ok() && mode != Mode::ReadBarrier {
					let mut state = self.state.lock();
					state.remove(mode);
					state.wake_compatible_prefix();
				}
				Err(Error::Cancelled)
			}
			res = rx => {
				res.map_err(|_| Error::Cancelled)?;
				Ok(LockGuard { manager: self, mode })
			}
		}
	}

	/// `acquire` bounded by a wall-clock timeout, surfaced as
	/// [`Error::Cancelled`] on expiry.
	pub async fn acquire_timeout(
		&self,
		mode: Mode,
		timeout: Duration,
		cancel: &CancellationToken,
	) -> Result<LockGuard<'_>, Error> {
		tokio::time::timeout(timeout, self.acquire(mode, cancel))
			.await
			.unwrap_or(Err(Error::Cancelled))
	}

	/// Waits until all currently- and previously-queued readers ahead of
	/// this call have drained. Never itself occupies a held slot.
	pub async fn read_barrier(&self, cancel: &CancellationToken) -> Result<(), Error> {
		self.acquire(Mode::ReadBarrier, cancel).await.map(|guard| {
			// ReadBarrier never inserts into `held`, so dropping the
			// guard normally would be a harmless no-op remove; skip it
			// entirely by forgetting the guard.
			std::mem::forget(guard);
		})
	}
}

impl Default for LockManager {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[tokio::test]
	async fn weak_readers_run_concurrently() {
		let manager = LockManager::new();
		let cancel = CancellationToken::new();
		let g1 = manager.acquire(Mode::WeakRead, &cancel).await.unwrap();
		let g2 = manager.acquire(Mode::WeakRead, &cancel).await.unwrap();
		drop(g1);
		drop(g2);
	}

	#[tokio::test]
	async fn write_excludes_other_writers() {
		let manager = Arc::new(LockManager::new());
		let cancel = CancellationToken::new();
		let writer = manager.acquire(Mode::Write, &cancel).await.unwrap();

		let manager2 = Arc::clone(&manager);
		let cancel2 = cancel.clone();
		let handle = tokio::spawn(async move {
			let _second = manager2.acquire(Mode::Write, &cancel2).await.unwrap();
		});

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!handle.is_finished());
		drop(writer);
		handle.await.unwrap();
	}

	#[tokio::test]
	async fn write_and_weak_read_are_compatible() {
		let manager = LockManager::new();
		let cancel = CancellationToken::new();
		let _writer = manager.acquire(Mode::Write, &cancel).await.unwrap();
		let _reader = manager.acquire(Mode::WeakRead, &cancel).await.unwrap();
	}

	#[tokio::test]
	async fn exclusive_excludes_everything() {
		let manager = Arc::new(LockManager::new());
		let cancel = CancellationToken::new();
		let ex = manager.acquire(Mode::Exclusive, &cancel).await.unwrap();

		let manager2 = Arc::clone(&manager);
		let cancel2 = cancel.clone();
		let handle = tokio::spawn(async move {
			manager2.acquire(Mode::WeakRead, &cancel2).await.unwrap();
		});

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!handle.is_finished());
		drop(ex);
		handle.await.unwrap();
	}

	#[tokio::test]
	async fn cancellation_releases_queued_request() {
		let manager = Arc::new(LockManager::new());
		let cancel = CancellationToken::new();
		let _writer = manager.acquire(Mode::Write, &cancel).await.unwrap();

		let blocked_cancel = CancellationToken::new();
		let manager2 = Arc::clone(&manager);
		let cancel_for_task = blocked_cancel.clone();
		let handle = tokio::spawn(async move { manager2.acquire(Mode::StrongRead, &cancel_for_task).await });

		tokio::time::sleep(Duration::from_millis(20)).await;
		blocked_cancel.cancel();
		let result = handle.await.unwrap();
		assert!(matches!(result, Err(Error::Cancelled)));
	}

	#[tokio::test]
	async fn read_barrier_waits_for_readers_to_drain() {
		let manager = Arc::new(LockManager::new());
		let cancel = CancellationToken::new();
		let reader = manager.acquire(Mode::WeakRead, &cancel).await.unwrap();

		let manager2 = Arc::clone(&manager);
		let cancel2 = cancel.clone();
		let handle = tokio::spawn(async move { manager2.read_barrier(&cancel2).await });

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!handle.is_finished());
		drop(reader);
		handle.await.unwrap().unwrap();
	}
}
