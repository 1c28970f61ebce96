mod anon;
mod mmap;

use std::{path::Path, sync::Arc};

use parking_lot::RwLock;

pub use anon::AnonPageManager;
pub use mmap::MmapPageManager;

use crate::{error::Error, id::PageIndex};

/// A page's backing bytes, shared behind a lock so the manager can hand
/// out non-owning handles while still serializing flush against
/// concurrent writers. Callers rely on the externally-held
/// [`LockManager`][crate::lock::LockManager] guard, not this lock, for
/// the append-vs-read discipline; this lock exists only to make flush
/// safe to call concurrently with an in-flight write to the tail page.
pub type PageHandle = Arc<RwLock<PageBuf>>;

/// A fixed-size, page-aligned byte buffer. Mutable in place; never
/// reallocated after creation.
pub enum PageBuf {
	Mmap(memmap2::MmapMut),
	Anon(crate::aligned_buf::AlignedBuffer),
}

impl PageBuf {
	pub fn as_slice(&self) -> &[u8] {
		match self {
			PageBuf::Mmap(m) => &m[..],
			PageBuf::Anon(b) => b.as_slice(),
		}
	}

	pub fn as_slice_mut(&mut self) -> &mut [u8] {
		match self {
			PageBuf::Mmap(m) => &mut m[..],
			PageBuf::Anon(b) => b.as_slice_mut(),
		}
	}
}

/// Common contract implemented by both page manager variants. Expressed
/// as a trait for documentation and mock-testing purposes; the
/// orchestrator holds the concrete [`PageManagerImpl`] enum rather than
/// a trait object so address resolution and range iteration stay
/// monomorphic on the hot path.
pub trait PageManager {
	fn page_size(&self) -> usize;

	/// Returns a handle to `page`, creating and zero-filling it on disk
	/// first if it doesn't yet exist. Idempotent: concurrent callers
	/// resolving the same index observe the same handle.
	fn get_or_add(&self, page: PageIndex) -> Result<PageHandle, Error>;

	/// Returns a handle to `page` only if it has already been created.
	fn try_get(&self, page: PageIndex) -> Option<PageHandle>;

	/// Deletes on-disk and in-memory pages with index `< upper_exclusive`.
	/// Caller must hold compaction rights; this does not check that
	/// itself.
	fn delete_pages_below(&self, upper_exclusive: PageIndex) -> Result<usize, Error>;

	/// Makes the half-open byte range `[start_page:start_offset,
	/// end_page:end_offset)` durable.
	fn flush(
		&self,
		start_page: PageIndex,
		start_offset: u32,
		end_page: PageIndex,
		end_offset: u32,
	) -> Result<(), Error>;
}

/// Dispatches to one of the two page manager variants without a vtable
/// indirection per call.
pub enum PageManagerImpl {
	Mmap(MmapPageManager),
	Anon(AnonPageManager),
}

impl PageManagerImpl {
	pub fn open_mmap(root: impl AsRef<Path>, page_size: usize) -> Result<Self, Error> {
		Ok(Self::Mmap(MmapPageManager::open(root, page_size)?))
	}

	pub fn open_anon(
		root: impl AsRef<Path>,
		page_size: usize,
		cache_capacity: usize,
	) -> Result<Self, Error> {
		Ok(Self::Anon(AnonPageManager::open(
			root,
			page_size,
			cache_capacity,
		)?))
	}
}

impl PageManager for PageManagerImpl {
	#[inline]
	fn page_size(&self) -> usize {
		match self {
			PageManagerImpl::Mmap(m) => m.page_size(),
			PageManagerImpl::Anon(a) => a.page_size(),
		}
	}

	#[inline]
	fn get_or_add(&self, page: PageIndex) -> Result<PageHandle, Error> {
		match self {
			PageManagerImpl::Mmap(m) => m.get_or_add(page),
			PageManagerImpl::Anon(a) => a.get_or_add(page),
		}
	}

	#[inline]
	fn try_get(&self, page: PageIndex) -> Option<PageHandle> {
		match self {
			PageManagerImpl::Mmap(m) => m.try_get(page),
			PageManagerImpl::Anon(a) => a.try_get(page),
		}
	}

	fn delete_pages_below(&self, upper_exclusive: PageIndex) -> Result<usize, Error> {
		match self {
			PageManagerImpl::Mmap(m) => m.delete_pages_below(upper_exclusive),
			PageManagerImpl::Anon(a) => a.delete_pages_below(upper_exclusive),
		}
	}

	fn flush(
		&self,
		start_page: PageIndex,
		start_offset: u32,
		end_page: PageIndex,
		end_offset: u32,
	) -> Result<(), Error> {
		match self {
			PageManagerImpl::Mmap(m) => m.flush(start_page, start_offset, end_page, end_offset),
			PageManagerImpl::Anon(a) => a.flush(start_page, start_offset, end_page, end_offset),
		}
	}
}
