//! Per-operation selection of the execution handle.
//!
//! A repository holds two handles of the same store that differ only in read
//! preference. Point lookups that must observe the latest write go to the
//! primary-consistency handle; everything else, writes included, goes to the
//! replica-preferred handle (the store routes writes to the primary itself).

use crate::backend::StoreBackend;

/// Read consistency of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Primary,
    ReplicaPreferred,
}

/// Repository operations, as far as handle selection is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    FindById,
    FindOne,
    FindList,
    FindPage,
    Count,
    FindField,
    FindSub,
    MapReduce,
    Group,
    Insert,
    Save,
    Update,
    Remove,
    FindAndRemove,
    FindAndModify,
    SaveSub,
    CollectionExists,
}

impl Operation {
    pub fn read_mode(&self) -> ReadMode {
        match self {
            Operation::FindById | Operation::FindOne => ReadMode::Primary,
            _ => ReadMode::ReplicaPreferred,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Insert
                | Operation::Save
                | Operation::Update
                | Operation::Remove
                | Operation::FindAndRemove
                | Operation::FindAndModify
                | Operation::SaveSub
        )
    }
}

/// The two execution handles of a repository.
#[derive(Debug, Clone)]
pub struct ReadHandles<B: StoreBackend> {
    primary: B,
    replica: B,
}

impl<B: StoreBackend> ReadHandles<B> {
    pub fn new(primary: B, replica: B) -> Self {
        Self { primary, replica }
    }

    /// Uses one handle for both read modes.
    pub fn single(backend: B) -> Self
    where
        B: Clone,
    {
        Self {
            primary: backend.clone(),
            replica: backend,
        }
    }

    pub fn primary(&self) -> &B {
        &self.primary
    }

    pub fn replica(&self) -> &B {
        &self.replica
    }

    pub fn by_mode(&self, mode: ReadMode) -> &B {
        match mode {
            ReadMode::Primary => &self.primary,
            ReadMode::ReplicaPreferred => &self.replica,
        }
    }

    /// The handle `operation` runs against.
    pub fn select(&self, operation: Operation) -> &B {
        let mode = operation.read_mode();
        tracing::trace!("Routing {:?} to the {:?} handle", operation, mode);
        self.by_mode(mode)
    }

    /// Shuts both handles down.
    pub async fn shutdown(self) -> crate::error::DataAccessResult<()> {
        self.primary.shutdown().await?;
        self.replica.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_point_lookups_read_from_primary() {
        assert_eq!(Operation::FindById.read_mode(), ReadMode::Primary);
        assert_eq!(Operation::FindOne.read_mode(), ReadMode::Primary);

        for operation in [
            Operation::FindList,
            Operation::FindPage,
            Operation::Count,
            Operation::FindField,
            Operation::FindSub,
            Operation::MapReduce,
            Operation::Group,
            Operation::Insert,
            Operation::Remove,
            Operation::SaveSub,
        ] {
            assert_eq!(operation.read_mode(), ReadMode::ReplicaPreferred);
        }
    }

    #[test]
    fn writes_are_flagged() {
        assert!(Operation::Save.is_write());
        assert!(Operation::FindAndModify.is_write());
        assert!(!Operation::FindOne.is_write());
        assert!(!Operation::CollectionExists.is_write());
    }
}
