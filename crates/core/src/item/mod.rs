//! Media items, their pipeline state and storage.

mod client;
mod patch;
mod sqlite_store;
mod state;
mod store;
mod types;

pub use client::StoreClient;
pub use patch::{ItemPatch, ItemUpdate};
pub use sqlite_store::SqliteItemStore;
pub use state::{ParseStageError, Stage, StageVerdict, VariantState};
pub use store::{ClaimFilter, CreateItemRequest, ItemError, ItemFilter, ItemStore, Requirement};
pub use types::{
    Item, ItemMetadata, PublishRecord, ResolveFailure, TransferRecord, VariantKey,
};
