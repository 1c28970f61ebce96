use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::{
	entry::{Context, Entry},
	id::Index,
};

/// The external collaborator the [`ApplyLoop`][crate::apply::ApplyLoop]
/// feeds committed entries to, in strict index order, exactly once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateMachine: Send + Sync {
	/// Applies a single committed entry. The loop awaits completion
	/// before advancing `last_applied` and moving to the next index.
	/// `context` carries whatever was passed to `append` for this index,
	/// if anything, and is never `Some` after a restart.
	async fn apply(&self, index: Index, entry: &Entry, context: Option<&Context>) -> Result<(), String>;

	/// Lower bound for compaction: entries at or below this index are
	/// already reflected in a snapshot the state machine holds, and may
	/// be dropped once also applied.
	fn snapshot_index(&self) -> Index;
}
