use std::time::Duration;

use crate::consts::{validate_page_size, PageSizeBoundsError, DEFAULT_CONCURRENCY_LEVEL, DEFAULT_PAGE_SIZE};

/// How often the WAL forces page and metadata durability in the
/// background, independent of explicit `commit`/`flush` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushInterval {
	/// Never flush automatically; callers must call `flush` themselves.
	Never,
	/// Flush synchronously on every commit.
	Zero,
	/// Flush in the background on this interval.
	Every(Duration),
}

/// Which [`PageManager`][crate::page::PageManager] variant backs the
/// log's page space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryManagement {
	/// Memory-mapped files; the OS owns paging.
	SharedMemory,
	/// Private anonymous buffers with a bounded page cache.
	PrivateMemory { cache_capacity: usize },
}

/// Tunable construction parameters, mirroring the split between
/// first-time initialization and reopening an existing directory.
#[derive(Debug, Clone)]
pub struct WalOptions {
	pub page_size: usize,
	pub concurrency_level: usize,
	pub flush_interval: FlushInterval,
	pub memory_management: MemoryManagement,
}

impl Default for WalOptions {
	fn default() -> Self {
		Self {
			page_size: DEFAULT_PAGE_SIZE,
			concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
			flush_interval: FlushInterval::Zero,
			memory_management: MemoryManagement::SharedMemory,
		}
	}
}

impl WalOptions {
	pub fn validate(&self) -> Result<(), PageSizeBoundsError> {
		validate_page_size(self.page_size)
	}

	pub fn with_page_size(mut self, page_size: usize) -> Self {
		self.page_size = page_size;
		self
	}

	pub fn with_concurrency_level(mut self, concurrency_level: usize) -> Self {
		self.concurrency_level = concurrency_level;
		self
	}

	pub fn with_flush_interval(mut self, flush_interval: FlushInterval) -> Self {
		self.flush_interval = flush_interval;
		self
	}

	pub fn with_memory_management(mut self, memory_management: MemoryManagement) -> Self {
		self.memory_management = memory_management;
		self
	}
}
