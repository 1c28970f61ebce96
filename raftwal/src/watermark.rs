use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

use crate::id::Index;

/// The log's shared, atomically-updated position state: how far the log
/// extends, how far it's committed, and how far it's been applied.
/// Shared between the orchestrator and the [`ApplyLoop`][crate::apply::ApplyLoop]
/// task via `Arc`.
pub struct Watermarks {
	last_entry: AtomicU64,
	last_committed: AtomicU64,
	last_applied: AtomicU64,
	poisoned: AtomicBool,
	committed_changed: Notify,
	applied_changed: Notify,
}

impl Watermarks {
	pub fn new(last_entry: Index, last_committed: Index, last_applied: Index) -> Self {
		Self {
			last_entry: AtomicU64::new(last_entry.get()),
			last_committed: AtomicU64::new(last_committed.get()),
			last_applied: AtomicU64::new(last_applied.get()),
			poisoned: AtomicBool::new(false),
			committed_changed: Notify::new(),
			applied_changed: Notify::new(),
		}
	}

	pub fn last_entry(&self) -> Index {
		Index(self.last_entry.load(Ordering::Acquire))
	}

	pub fn set_last_entry(&self, value: Index) {
		self.last_entry.store(value.get(), Ordering::Release);
	}

	pub fn last_committed(&self) -> Index {
		Index(self.last_committed.load(Ordering::Acquire))
	}

	/// Monotonically advances the committed watermark to `value` and
	/// wakes anything waiting on a commit change. No-op if `value` does
	/// not advance it.
	pub fn advance_committed(&self, value: Index) -> bool {
		let advanced = self
			.last_committed
			.fetch_max(value.get(), Ordering::AcqRel)
			< value.get();
		if advanced {
			self.committed_changed.notify_waiters();
		}
		advanced
	}

	pub fn last_applied(&self) -> Index {
		Index(self.last_applied.load(Ordering::Acquire))
	}

	pub fn advance_applied(&self, value: Index) {
		self.last_applied.fetch_max(value.get(), Ordering::AcqRel);
		self.applied_changed.notify_waiters();
	}

	pub fn is_poisoned(&self) -> bool {
		self.poisoned.load(Ordering::Acquire)
	}

	pub fn poison(&self) {
		self.poisoned.store(true, Ordering::Release);
		// Unblock any waiter so it can observe the poisoned state instead
		// of hanging forever.
		self.committed_changed.notify_waiters();
		self.applied_changed.notify_waiters();
	}

	pub async fn wait_for_commit_change(&self) {
		self.committed_changed.notified().await;
	}

	/// Suspends until `last_applied >= index` or the log is poisoned.
	pub async fn wait_for_apply(&self, index: Index) {
		while self.last_applied() < index && !self.is_poisoned() {
			let notified = self.applied_changed.notified();
			if self.last_applied() >= index || self.is_poisoned() {
				return;
			}
			notified.await;
		}
	}
}
