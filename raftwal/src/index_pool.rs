use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free pool of up to 64 small integer slot identifiers, backed by
/// a single atomic word. Used by the anonymous-memory page manager to
/// rent page-cache slots without a mutex on the hot path.
///
/// Capped at 63 usable slots (bit 63 is reserved as a sentinel so
/// `try_take` can distinguish "pool full" from "slot 63 taken" without
/// a separate flag) per the bitmask design note.
pub struct IndexPool {
	taken: AtomicU64,
}

pub const MAX_SLOTS: u32 = 63;

impl IndexPool {
	pub fn new() -> Self {
		Self {
			taken: AtomicU64::new(0),
		}
	}

	/// Claims the lowest free slot, if any, via a CAS loop using the
	/// `x & (x - 1)` lowest-set-bit trick to find and flip the clear bit.
	pub fn try_take(&self) -> Option<u32> {
		let mut current = self.taken.load(Ordering::Acquire);
		loop {
			let free = !current & ((1u64 << MAX_SLOTS) - 1);
			if free == 0 {
				return None;
			}
			let slot = free.trailing_zeros();
			let next = current | (1 << slot);
			match self.taken.compare_exchange_weak(
				current,
				next,
				Ordering::AcqRel,
				Ordering::Acquire,
			) {
				Ok(_) => return Some(slot),
				Err(actual) => current = actual,
			}
		}
	}

	/// Releases a previously taken slot. Idempotent: returning an
	/// already-free slot is a no-op.
	pub fn put_back(&self, slot: u32) {
		debug_assert!(slot < MAX_SLOTS);
		self.taken.fetch_and(!(1 << slot), Ordering::AcqRel);
	}

	pub fn take_all(&self) -> Vec<u32> {
		let mut taken = Vec::new();
		loop {
			match self.try_take() {
				Some(slot) => taken.push(slot),
				None => return taken,
			}
		}
	}

	pub fn return_all(&self, slots: impl IntoIterator<Item = u32>) {
		for slot in slots {
			self.put_back(slot);
		}
	}

	pub fn contains(&self, slot: u32) -> bool {
		debug_assert!(slot < MAX_SLOTS);
		self.taken.load(Ordering::Acquire) & (1 << slot) != 0
	}

	pub fn count(&self) -> u32 {
		self.taken.load(Ordering::Acquire).count_ones()
	}
}

impl Default for IndexPool {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use std::{sync::Arc, thread};

	use super::*;

	#[test]
	fn take_and_return_single_slot() {
		let pool = IndexPool::new();
		let slot = pool.try_take().unwrap();
		assert!(pool.contains(slot));
		assert_eq!(pool.count(), 1);
		pool.put_back(slot);
		assert!(!pool.contains(slot));
		assert_eq!(pool.count(), 0);
	}

	#[test]
	fn exhausts_after_max_slots() {
		let pool = IndexPool::new();
		let taken = pool.take_all();
		assert_eq!(taken.len(), MAX_SLOTS as usize);
		assert!(pool.try_take().is_none());
		pool.return_all(taken);
		assert_eq!(pool.count(), 0);
	}

	#[test]
	fn returning_a_free_slot_is_a_no_op() {
		let pool = IndexPool::new();
		pool.put_back(5);
		assert_eq!(pool.count(), 0);
	}

	#[test]
	fn concurrent_take_never_double_assigns() {
		let pool = Arc::new(IndexPool::new());
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let pool = Arc::clone(&pool);
				thread::spawn(move || {
					let mut got = Vec::new();
					while let Some(slot) = pool.try_take() {
						got.push(slot);
					}
					got
				})
			})
			.collect();
		let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
		all.sort_unstable();
		all.dedup();
		assert_eq!(all.len(), MAX_SLOTS as usize);
	}
}
