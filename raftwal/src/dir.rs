use std::path::PathBuf;

use static_assertions::assert_impl_all;

/// Resolves the well-known file/directory names under a WAL's root
/// directory: `metadata`, `index`, and `pages/<decimal-index>`.
pub struct WalDir {
	path: PathBuf,
}

assert_impl_all!(WalDir: Send, Sync);

impl WalDir {
	const METADATA_FILE_NAME: &'static str = "metadata";
	const INDEX_FILE_NAME: &'static str = "index";

	pub fn new(path: PathBuf) -> Self {
		Self { path }
	}

	pub fn root(&self) -> &PathBuf {
		&self.path
	}

	pub fn metadata_file(&self) -> PathBuf {
		self.path.join(Self::METADATA_FILE_NAME)
	}

	pub fn index_file(&self) -> PathBuf {
		self.path.join(Self::INDEX_FILE_NAME)
	}

	pub fn pages_dir(&self) -> PathBuf {
		self.path.join("pages")
	}

	pub fn page_file(&self, page_index: u32) -> PathBuf {
		self.pages_dir().join(page_index.to_string())
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use tempfile::tempdir;

	use super::*;

	#[test]
	fn resolves_metadata_file() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("metadata"), [69]).unwrap();

		let wal_dir = WalDir::new(dir.path().into());
		let buf = fs::read(wal_dir.metadata_file()).unwrap();
		assert_eq!(buf, vec![69]);
	}

	#[test]
	fn resolves_page_file() {
		let dir = tempdir().unwrap();
		let wal_dir = WalDir::new(dir.path().into());
		assert_eq!(wal_dir.page_file(3), wal_dir.pages_dir().join("3"));
	}
}
