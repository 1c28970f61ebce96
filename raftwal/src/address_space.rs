use crate::{
	address::{chunk_bounds, Address},
	error::Error,
	page::{PageBuf, PageManager, PageManagerImpl},
};

/// Converts logical byte offsets into `(page, offset)` pairs and
/// exposes range reads/writes as contiguous logical byte sequences over
/// whichever [`PageManagerImpl`] variant backs the log.
pub struct AddressSpace {
	pages: PageManagerImpl,
}

impl AddressSpace {
	pub fn new(pages: PageManagerImpl) -> Self {
		Self { pages }
	}

	pub fn page_size(&self) -> usize {
		self.pages.page_size()
	}

	pub fn pages(&self) -> &PageManagerImpl {
		&self.pages
	}

	/// Reads `len` bytes starting at `start`, materializing the result
	/// since callers (entry decoding) need a contiguous slice. Fails if
	/// any page in range hasn't been written yet.
	pub fn read_range(&self, start: Address, len: u64) -> Result<Vec<u8>, Error> {
		let mut out = Vec::with_capacity(len as usize);
		for (page, offset, chunk_len) in chunk_bounds(start, len, self.page_size()) {
			let handle = self.pages.try_get(page).ok_or(Error::OutOfRange {
				index: crate::id::Index(page.get() as u64),
				last_entry: crate::id::Index(0),
			})?;
			let guard = handle.read();
			let bytes = guard.as_slice();
			out.extend_from_slice(&bytes[offset as usize..offset as usize + chunk_len as usize]);
		}
		Ok(out)
	}

	/// Writes `bytes` starting at `start`, allocating pages as needed.
	/// Only valid to call for the tail of the current append, under the
	/// write lock, per the shared-resource rule that mutation is
	/// permitted only to the tail page.
	pub fn write_range(&self, start: Address, bytes: &[u8]) -> Result<(), Error> {
		let mut written = 0usize;
		for (page, offset, chunk_len) in chunk_bounds(start, bytes.len() as u64, self.page_size()) {
			let handle = self.pages.get_or_add(page)?;
			{
				let mut guard = handle.write();
				let slice = guard.as_slice_mut();
				slice[offset as usize..offset as usize + chunk_len as usize]
					.copy_from_slice(&bytes[written..written + chunk_len as usize]);
			}
			if let PageManagerImpl::Anon(anon) = &self.pages {
				anon.mark_dirty(page);
			}
			written += chunk_len as usize;
		}
		Ok(())
	}

	pub fn flush(&self, start: Address, len: u64) -> Result<(), Error> {
		if len == 0 {
			return Ok(());
		}
		let page_size = self.page_size();
		let (start_page, start_offset) = start.split(page_size);
		let end = start.checked_add(len).expect("address overflow");
		let (mut end_page, mut end_offset) = end.split(page_size);
		if end_offset == 0 && end_page.get() > 0 {
			end_page = crate::id::PageIndex(end_page.get() - 1);
			end_offset = page_size as u32;
		}
		self.pages.flush(start_page, start_offset, end_page, end_offset)
	}
}
