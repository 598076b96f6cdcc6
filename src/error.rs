/// Error type for the skipindex crate.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An equal key is already present and the insertion did not allow duplicates.
    /// The rejected key is dropped.
    #[error("key already exists in the skiplist")]
    Duplicated,

    /// No visible entry matches the key.
    #[error("key not found in the skiplist")]
    NotFound,

    /// The cursor addresses the end position and has no entry to read.
    #[error("trying to get data through an invalid iterator")]
    InvalidIterator,

    /// The options cannot describe a usable skiplist.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),
}

/// Outcome of a single attempt to erase a specific node. Never leaves the crate:
/// the public erase paths retry or translate these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EraseError {
    /// Another eraser already claimed the node.
    AlreadyRemoved,
    /// Another structural operation holds the node's guard.
    Busy,
    /// The node was found unlinked after it had been claimed.
    Unlinked,
}
