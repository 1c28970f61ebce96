use std::ops::RangeInclusive;

use thiserror::Error;

use crate::units::*;

pub const WAL_MAGIC: [u8; 4] = *b"RWAL";
pub const META_MAGIC: [u8; 4] = *b"RWLM";
pub const INDEX_MAGIC: [u8; 4] = *b"RWLI";

pub const META_FORMAT_VERSION: u32 = 1;
pub const INDEX_RECORD_FORMAT_VERSION: u32 = 1;

pub const DEFAULT_PAGE_SIZE: usize = 16 * KiB;
pub const PAGE_SIZE_RANGE: RangeInclusive<usize> = (4 * KiB)..=(64 * MiB);

/// Default size hint for the in-memory page cache backing the anonymous
/// memory manager, in number of pages. Bounded by the bitmask index pool
/// at 63 usable slots regardless of what's requested here.
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 8;

#[derive(Debug, Error)]
#[error(
	"Page size {0} is invalid; must be a power of two between {} and {}",
	display_size(*PAGE_SIZE_RANGE.start()),
	display_size(*PAGE_SIZE_RANGE.end())
)]
pub struct PageSizeBoundsError(pub usize);

#[inline]
pub fn validate_page_size(size: usize) -> Result<(), PageSizeBoundsError> {
	if !size.is_power_of_two() || !PAGE_SIZE_RANGE.contains(&size) {
		return Err(PageSizeBoundsError(size));
	}
	Ok(())
}

/// Rounds `size` up to the nearest multiple of the OS page size.
pub fn round_up_to_os_page(size: usize) -> usize {
	let os_page = page_size::get();
	if os_page == 0 {
		return size;
	}
	size.div_ceil(os_page) * os_page
}
