use std::{
	collections::{HashMap, HashSet, VecDeque},
	fs::{self, File, OpenOptions},
	path::{Path, PathBuf},
	sync::Arc,
};

use parking_lot::RwLock;

use super::{PageBuf, PageHandle, PageManager};
use crate::{aligned_buf::AlignedBuffer, error::Error, id::PageIndex, index_pool::IndexPool};

/// Page manager backed by private, page-aligned anonymous buffers. A
/// bounded page cache (at most [`index_pool::MAX_SLOTS`][crate::index_pool::MAX_SLOTS]
/// resident pages) keeps hot pages around; slots are rented from a
/// [`IndexPool`]. Flush writes the dirty sub-range of a resident page
/// to its backing file and fsyncs.
pub struct AnonPageManager {
	root: PathBuf,
	page_size: usize,
	cache_capacity: usize,
	slots: IndexPool,
	state: RwLock<CacheState>,
	huge_pages_advised: bool,
}

struct CacheState {
	resident: HashMap<PageIndex, PageHandle>,
	dirty: HashSet<PageIndex>,
	fifo: VecDeque<PageIndex>,
	highest_known: Option<PageIndex>,
}

impl AnonPageManager {
	pub fn open(root: impl AsRef<Path>, page_size: usize, cache_capacity: usize) -> Result<Self, Error> {
		let root = root.as_ref().to_path_buf();
		let pages_dir = root.join("pages");
		fs::create_dir_all(&pages_dir).map_err(|source| Error::Io {
			path: pages_dir.clone(),
			offset: 0,
			source,
		})?;
		let cache_capacity = cache_capacity.min(crate::index_pool::MAX_SLOTS as usize).max(1);
		let highest_known = fs::read_dir(&pages_dir)
			.map_err(|source| Error::Io {
				path: pages_dir.clone(),
				offset: 0,
				source,
			})?
			.filter_map(|entry| entry.ok())
			.filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
			.map(PageIndex)
			.max();

		let huge_pages_advised = huge_page_alignment_matches(page_size);

		Ok(Self {
			root,
			page_size,
			cache_capacity,
			slots: IndexPool::new(),
			state: RwLock::new(CacheState {
				resident: HashMap::new(),
				dirty: HashSet::new(),
				fifo: VecDeque::new(),
				highest_known,
			}),
			huge_pages_advised,
		})
	}

	fn pages_dir(&self) -> PathBuf {
		self.root.join("pages")
	}

	fn page_path(&self, index: PageIndex) -> PathBuf {
		self.pages_dir().join(index.get().to_string())
	}

	fn open_backing_file(&self, index: PageIndex) -> Result<File, Error> {
		let path = self.page_path(index);
		OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(&path)
			.map_err(|source| Error::Io {
				path,
				offset: 0,
				source,
			})
	}

	fn load_page(&self, index: PageIndex) -> Result<PageHandle, Error> {
		let mut buf = AlignedBuffer::with_capacity(self.page_size, self.page_size);
		let path = self.page_path(index);
		if path.exists() {
			let file = self.open_backing_file(index)?;
			crate::io::IoTarget::read_at(&file, buf.as_slice_mut(), 0).map_err(|source| Error::Io {
				path: path.clone(),
				offset: 0,
				source,
			})?;
		}
		if self.huge_pages_advised {
			buf.advise_huge_pages();
		}
		Ok(Arc::new(RwLock::new(PageBuf::Anon(buf))))
	}

	fn evict_one(&self, state: &mut CacheState) -> Result<(), Error> {
		let Some(victim) = state.fifo.pop_front() else {
			return Ok(());
		};
		if state.dirty.remove(&victim) {
			if let Some(handle) = state.resident.get(&victim) {
				self.write_back(victim, handle)?;
			}
		}
		state.resident.remove(&victim);
		Ok(())
	}

	fn write_back(&self, index: PageIndex, handle: &PageHandle) -> Result<(), Error> {
		let path = self.page_path(index);
		let mut file = self.open_backing_file(index)?;
		let guard = handle.read();
		crate::io::IoTarget::write_at(&mut file, guard.as_slice(), 0).map_err(|source| Error::Io {
			path: path.clone(),
			offset: 0,
			source,
		})?;
		file.sync_all().map_err(|source| Error::Io {
			path,
			offset: 0,
			source,
		})
	}
}

fn huge_page_alignment_matches(page_size: usize) -> bool {
	#[cfg(target_os = "linux")]
	{
		if let Ok(contents) = fs::read_to_string("/sys/kernel/mm/transparent_hugepage/hpage_pmd_size") {
			if let Ok(hpage_size) = contents.trim().parse::<usize>() {
				return hpage_size > 0 && page_size % hpage_size == 0;
			}
		}
		false
	}
	#[cfg(not(target_os = "linux"))]
	{
		let _ = page_size;
		false
	}
}

impl PageManager for AnonPageManager {
	fn page_size(&self) -> usize {
		self.page_size
	}

	fn get_or_add(&self, page: PageIndex) -> Result<PageHandle, Error> {
		if let Some(handle) = self.try_get(page) {
			return Ok(handle);
		}
		let handle = self.load_page(page)?;
		let mut state = self.state.write();
		if let Some(existing) = state.resident.get(&page) {
			return Ok(Arc::clone(existing));
		}
		if state.resident.len() >= self.cache_capacity {
			self.evict_one(&mut state)?;
		}
		state.resident.insert(page, Arc::clone(&handle));
		state.fifo.push_back(page);
		state.highest_known = Some(state.highest_known.map_or(page, |h| h.max(page)));
		Ok(handle)
	}

	fn try_get(&self, page: PageIndex) -> Option<PageHandle> {
		self.state.read().resident.get(&page).cloned()
	}

	fn delete_pages_below(&self, upper_exclusive: PageIndex) -> Result<usize, Error> {
		let mut state = self.state.write();
		let to_remove: Vec<PageIndex> = state.resident.keys().copied().filter(|p| *p < upper_exclusive).collect();
		for index in &to_remove {
			state.resident.remove(index);
			state.dirty.remove(index);
			state.fifo.retain(|p| p != index);
		}
		let pages_dir = self.pages_dir();
		let mut deleted = to_remove.len();
		for entry in fs::read_dir(&pages_dir).map_err(|source| Error::Io {
			path: pages_dir.clone(),
			offset: 0,
			source,
		})? {
			let entry = entry.map_err(|source| Error::Io {
				path: pages_dir.clone(),
				offset: 0,
				source,
			})?;
			let Some(index) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()).map(PageIndex) else {
				continue;
			};
			if index < upper_exclusive {
				let path = entry.path();
				if !to_remove.contains(&index) {
					deleted += 1;
				}
				let _ = fs::remove_file(path);
			}
		}
		Ok(deleted)
	}

	fn flush(
		&self,
		start_page: PageIndex,
		_start_offset: u32,
		end_page: PageIndex,
		_end_offset: u32,
	) -> Result<(), Error> {
		let mut state = self.state.write();
		let mut page = start_page.get();
		while page <= end_page.get() {
			let idx = PageIndex(page);
			if state.dirty.remove(&idx) {
				if let Some(handle) = state.resident.get(&idx).cloned() {
					self.write_back(idx, &handle)?;
				}
			}
			page += 1;
		}
		Ok(())
	}
}

impl AnonPageManager {
	/// Marks `page` dirty so the next [`flush`][PageManager::flush]
	/// covering it writes it back. Called by the orchestrator after a
	/// write lands in a resident page's buffer.
	pub fn mark_dirty(&self, page: PageIndex) {
		self.state.write().dirty.insert(page);
	}
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	#[test]
	fn creates_and_retrieves_page() {
		let dir = tempdir().unwrap();
		let manager = AnonPageManager::open(dir.path(), 4096, 4).unwrap();
		let handle = manager.get_or_add(PageIndex(0)).unwrap();
		handle.write().as_slice_mut()[0] = 7;
		manager.mark_dirty(PageIndex(0));
		assert_eq!(manager.try_get(PageIndex(0)).unwrap().read().as_slice()[0], 7);
	}

	#[test]
	fn flush_persists_to_backing_file() {
		let dir = tempdir().unwrap();
		let manager = AnonPageManager::open(dir.path(), 4096, 4).unwrap();
		let handle = manager.get_or_add(PageIndex(0)).unwrap();
		handle.write().as_slice_mut()[0..4].copy_from_slice(&[1, 2, 3, 4]);
		manager.mark_dirty(PageIndex(0));
		manager.flush(PageIndex(0), 0, PageIndex(0), 4096).unwrap();

		let manager2 = AnonPageManager::open(dir.path(), 4096, 4).unwrap();
		let reloaded = manager2.get_or_add(PageIndex(0)).unwrap();
		assert_eq!(&reloaded.read().as_slice()[0..4], &[1, 2, 3, 4]);
	}

	#[test]
	fn cache_evicts_and_writes_back_dirty_pages() {
		let dir = tempdir().unwrap();
		let manager = AnonPageManager::open(dir.path(), 4096, 2).unwrap();
		let h0 = manager.get_or_add(PageIndex(0)).unwrap();
		h0.write().as_slice_mut()[0] = 9;
		manager.mark_dirty(PageIndex(0));
		manager.get_or_add(PageIndex(1)).unwrap();
		manager.get_or_add(PageIndex(2)).unwrap();

		assert!(manager.try_get(PageIndex(0)).is_none());
		let reloaded = manager.get_or_add(PageIndex(0)).unwrap();
		assert_eq!(reloaded.read().as_slice()[0], 9);
	}

	#[test]
	fn delete_pages_below_removes_resident_and_on_disk_pages() {
		let dir = tempdir().unwrap();
		let manager = AnonPageManager::open(dir.path(), 4096, 8).unwrap();
		manager.get_or_add(PageIndex(0)).unwrap();
		manager.get_or_add(PageIndex(1)).unwrap();
		manager.flush(PageIndex(0), 0, PageIndex(1), 4096).unwrap();
		let deleted = manager.delete_pages_below(PageIndex(1)).unwrap();
		assert_eq!(deleted, 1);
		assert!(manager.try_get(PageIndex(0)).is_none());
	}
}
