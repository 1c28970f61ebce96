use std::sync::Arc;

use log::{error, warn};
use tokio_util::sync::CancellationToken;

use crate::{
	entry::{Context, Entry},
	error::Error,
	id::Index,
	lock::{LockManager, Mode},
	state_machine::StateMachine,
	watermark::Watermarks,
};

/// Narrow seam the apply loop needs from the orchestrator: reading
/// already-committed entries and claiming/clearing their volatile
/// context. Kept as a trait (rather than depending on `WriteAheadLog`
/// directly) so the loop and the orchestrator can live in separate
/// modules without a cycle.
#[async_trait::async_trait]
pub trait ApplySource: Send + Sync {
	fn read_entry(&self, index: Index) -> Result<Entry, Error>;

	/// Removes and returns the context registered for `index`, if any.
	fn take_context(&self, index: Index) -> Option<Context>;
}

/// Single-threaded, long-running, cooperative consumer that feeds
/// committed entries to the state machine in strict index order,
/// exactly once, advancing `last_applied` after each successful apply.
pub struct ApplyLoop<S: ApplySource> {
	source: Arc<S>,
	state_machine: Arc<dyn StateMachine>,
	locks: Arc<LockManager>,
	watermarks: Arc<Watermarks>,
}

impl<S: ApplySource + 'static> ApplyLoop<S> {
	pub fn new(
		source: Arc<S>,
		state_machine: Arc<dyn StateMachine>,
		locks: Arc<LockManager>,
		watermarks: Arc<Watermarks>,
	) -> Self {
		Self {
			source,
			state_machine,
			locks,
			watermarks,
		}
	}

	/// Spawns the loop as a background task. The returned handle
	/// finishes once `cancel` fires or the log is poisoned by an apply
	/// failure.
	pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move { self.run(cancel).await })
	}

	async fn run(self, cancel: CancellationToken) {
		loop {
			if cancel.is_cancelled() || self.watermarks.is_poisoned() {
				return;
			}
			let last_applied = self.watermarks.last_applied();
			let last_committed = self.watermarks.last_committed();
			if last_committed <= last_applied {
				tokio::select! {
					_ = cancel.cancelled() => return,
					_ = self.watermarks.wait_for_commit_change() => continue,
				}
			}

			let Ok(_guard) = self.locks.acquire(Mode::WeakRead, &cancel).await else {
				return;
			};

			let mut next = last_applied.next();
			while next <= self.watermarks.last_committed() {
				if cancel.is_cancelled() {
					return;
				}
				match self.apply_one(next).await {
					Ok(()) => {
						self.watermarks.advance_applied(next);
						next = next.next();
					}
					Err(err) => {
						error!("apply failed at index {next}: {err}; poisoning log");
						self.watermarks.poison();
						return;
					}
				}
			}
		}
	}

	async fn apply_one(&self, index: Index) -> Result<(), Error> {
		let entry = self.source.read_entry(index)?;
		let context = self.source.take_context(index);
		self.state_machine
			.apply(index, &entry, context.as_ref())
			.await
			.map_err(|_| {
				warn!("state machine rejected apply at index {index}");
				Error::Io {
					path: std::path::PathBuf::from("<state-machine>"),
					offset: 0,
					source: std::io::Error::new(std::io::ErrorKind::Other, "apply failed"),
				}
			})
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	use parking_lot::Mutex;

	use super::*;
	use crate::id::Term;

	struct FakeSource {
		entries: Mutex<Vec<Entry>>,
	}

	#[async_trait::async_trait]
	impl ApplySource for FakeSource {
		fn read_entry(&self, index: Index) -> Result<Entry, Error> {
			self.entries
				.lock()
				.get(index.get() as usize - 1)
				.cloned()
				.ok_or(Error::OutOfRange {
					index,
					last_entry: Index(self.entries.lock().len() as u64),
				})
		}

		fn take_context(&self, _index: Index) -> Option<Context> {
			None
		}
	}

	#[tokio::test]
	async fn applies_committed_entries_in_order_exactly_once() {
		let source = Arc::new(FakeSource {
			entries: Mutex::new(vec![
				Entry::new(Term(1), 0, vec![1]),
				Entry::new(Term(1), 0, vec![2]),
				Entry::new(Term(1), 0, vec![3]),
			]),
		});
		let applied_order = Arc::new(Mutex::new(Vec::new()));
		let call_count = Arc::new(AtomicUsize::new(0));

		let mut mock = crate::state_machine::MockStateMachine::new();
		{
			let applied_order = Arc::clone(&applied_order);
			let call_count = Arc::clone(&call_count);
			mock.expect_apply().returning(move |index, _entry, _ctx| {
				applied_order.lock().push(index);
				call_count.fetch_add(1, Ordering::SeqCst);
				Ok(())
			});
		}
		mock.expect_snapshot_index().return_const(Index::ZERO);

		let watermarks = Arc::new(Watermarks::new(Index(3), Index(3), Index::ZERO));
		let locks = Arc::new(LockManager::new());
		let cancel = CancellationToken::new();

		let handle = ApplyLoop::new(source, Arc::new(mock), locks, Arc::clone(&watermarks))
			.spawn(cancel.clone());

		watermarks.wait_for_apply(Index(3)).await;
		cancel.cancel();
		let _ = handle.await;

		assert_eq!(*applied_order.lock(), vec![Index(1), Index(2), Index(3)]);
		assert_eq!(call_count.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn apply_failure_poisons_the_log_and_stops() {
		let source = Arc::new(FakeSource {
			entries: Mutex::new(vec![Entry::new(Term(1), 0, vec![1])]),
		});
		let mut mock = crate::state_machine::MockStateMachine::new();
		mock.expect_apply().returning(|_, _, _| Err("boom".to_string()));
		mock.expect_snapshot_index().return_const(Index::ZERO);

		let watermarks = Arc::new(Watermarks::new(Index(1), Index(1), Index::ZERO));
		let locks = Arc::new(LockManager::new());
		let cancel = CancellationToken::new();

		let handle = ApplyLoop::new(source, Arc::new(mock), locks, Arc::clone(&watermarks))
			.spawn(cancel.clone());
		handle.await.unwrap();

		assert!(watermarks.is_poisoned());
		assert_eq!(watermarks.last_applied(), Index::ZERO);
	}
}
