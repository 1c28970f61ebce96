use std::{
	collections::HashMap,
	fs::{self, File, OpenOptions},
	path::{Path, PathBuf},
	sync::Arc,
};

use memmap2::MmapMut;
use parking_lot::RwLock;

use super::{PageBuf, PageHandle, PageManager};
use crate::{error::Error, id::PageIndex};

/// Page manager backed by one memory-mapped file per page under
/// `<root>/pages/<decimal-index>`. Writes go directly to the mapping;
/// the OS may flush dirty pages under memory pressure on its own.
/// Flush uses `MmapMut::flush_range`, the platform msync-equivalent.
pub struct MmapPageManager {
	root: PathBuf,
	page_size: usize,
	pages: RwLock<HashMap<PageIndex, PageHandle>>,
}

impl MmapPageManager {
	pub fn open(root: impl AsRef<Path>, page_size: usize) -> Result<Self, Error> {
		let root = root.as_ref().to_path_buf();
		let pages_dir = root.join("pages");
		fs::create_dir_all(&pages_dir).map_err(|source| Error::Io {
			path: pages_dir.clone(),
			offset: 0,
			source,
		})?;
		let mut loaded = HashMap::new();
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
			let Some(index) = parse_page_file_name(&entry.file_name()) else {
				continue;
			};
			let file = open_page_file(&pages_dir, index)?;
			let mmap = map_file(&file, page_size, index, &pages_dir)?;
			loaded.insert(index, Arc::new(RwLock::new(PageBuf::Mmap(mmap))));
		}
		Ok(Self {
			root,
			page_size,
			pages: RwLock::new(loaded),
		})
	}

	fn pages_dir(&self) -> PathBuf {
		self.root.join("pages")
	}

	fn page_path(&self, index: PageIndex) -> PathBuf {
		self.pages_dir().join(index.get().to_string())
	}
}

fn parse_page_file_name(name: &std::ffi::OsStr) -> Option<PageIndex> {
	name.to_str()?.parse::<u32>().ok().map(PageIndex)
}

fn open_page_file(pages_dir: &Path, index: PageIndex) -> Result<File, Error> {
	let path = pages_dir.join(index.get().to_string());
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

fn map_file(file: &File, page_size: usize, index: PageIndex, pages_dir: &Path) -> Result<MmapMut, Error> {
	let err_path = || pages_dir.join(index.get().to_string());
	let current_len = file.metadata().map_err(|source| Error::Io {
		path: err_path(),
		offset: 0,
		source,
	})?.len();
	if current_len < page_size as u64 {
		file.set_len(page_size as u64).map_err(|source| Error::Io {
			path: err_path(),
			offset: 0,
			source,
		})?;
	}
	unsafe { MmapMut::map_mut(file) }.map_err(|source| Error::Io {
		path: err_path(),
		offset: 0,
		source,
	})
}

impl PageManager for MmapPageManager {
	fn page_size(&self) -> usize {
		self.page_size
	}

	fn get_or_add(&self, page: PageIndex) -> Result<PageHandle, Error> {
		if let Some(handle) = self.try_get(page) {
			return Ok(handle);
		}
		let mut pages = self.pages.write();
		if let Some(handle) = pages.get(&page) {
			return Ok(Arc::clone(handle));
		}
		let pages_dir = self.pages_dir();
		let file = open_page_file(&pages_dir, page)?;
		let mmap = map_file(&file, self.page_size, page, &pages_dir)?;
		let handle = Arc::new(RwLock::new(PageBuf::Mmap(mmap)));
		pages.insert(page, Arc::clone(&handle));
		Ok(handle)
	}

	fn try_get(&self, page: PageIndex) -> Option<PageHandle> {
		self.pages.read().get(&page).cloned()
	}

	fn delete_pages_below(&self, upper_exclusive: PageIndex) -> Result<usize, Error> {
		let mut pages = self.pages.write();
		let to_remove: Vec<PageIndex> = pages.keys().copied().filter(|p| *p < upper_exclusive).collect();
		for index in &to_remove {
			pages.remove(index);
			let path = self.page_path(*index);
			if path.exists() {
				fs::remove_file(&path).map_err(|source| Error::Io {
					path,
					offset: 0,
					source,
				})?;
			}
		}
		Ok(to_remove.len())
	}

	fn flush(
		&self,
		start_page: PageIndex,
		start_offset: u32,
		end_page: PageIndex,
		end_offset: u32,
	) -> Result<(), Error> {
		let pages = self.pages.read();
		let mut page = start_page.get();
		while page <= end_page.get() {
			let idx = PageIndex(page);
			if let Some(handle) = pages.get(&idx) {
				let from = if idx == start_page { start_offset as usize } else { 0 };
				let to = if idx == end_page {
					end_offset as usize
				} else {
					self.page_size
				};
				if to > from {
					let guard = handle.read();
					if let PageBuf::Mmap(mmap) = &*guard {
						mmap.flush_range(from, to - from).map_err(|source| Error::Io {
							path: self.page_path(idx),
							offset: from as u64,
							source,
						})?;
					}
				}
			}
			page += 1;
		}
		Ok(())
	}
}
