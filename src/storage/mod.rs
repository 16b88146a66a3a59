mod contents;
mod reconcile;
mod schema;
mod sources;
mod types;

pub use schema::Database;
pub use types::{
    CanonicalItem, Content, DatabaseError, NewSource, Reconciled, Source, SourceType,
    UnknownSourceType,
};
