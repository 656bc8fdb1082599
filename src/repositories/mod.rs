//! # Repository Layer
//!
//! Persistence ports and their SeaORM implementations.

pub mod key;

pub use key::{
    KeyFilter, KeyPage, KeyPatch, KeyRepository, NewKey, PageRequest, RepositoryError,
    SeaOrmKeyRepository, SortField, SortSpec,
};
