//! Recoverable failures reported by world operations.

use crate::archetype::ArchetypeId;

/// Errors returned by the fallible (`try_*`) world operations.
///
/// Programmer errors such as malformed edits are not represented here;
/// they panic instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The chunk allocator could not provide a new chunk.
    /// The world is left in the state before the failed operation.
    #[error("cannot allocate a chunk of {size} bytes (align {align}) for archetype {archetype:?}")]
    ChunkAlloc {
        /// The archetype that needed a new chunk.
        archetype: ArchetypeId,
        /// The requested chunk size in bytes.
        size:      usize,
        /// The requested chunk alignment.
        align:     usize,
    },
}
