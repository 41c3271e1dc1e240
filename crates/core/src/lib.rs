pub mod config;
pub mod item;
pub mod metrics;
pub mod policy;
pub mod publisher;
pub mod resolver;
pub mod testing;
pub mod transporter;
pub mod worker;

pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use item::{
    CreateItemRequest, Item, ItemError, ItemFilter, ItemStore, SqliteItemStore, Stage, VariantKey,
};
pub use worker::{Collaborators, WorkerPool, WorkerStatus};
