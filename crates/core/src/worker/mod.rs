//! Stage workers: polling loops that move items through the pipeline.

mod config;
mod pool;
mod runner;
pub mod stages;
mod types;

pub use config::{RoleConfig, WorkersConfig};
pub use pool::{Collaborators, WorkerPool};
pub use runner::{
    generate_worker_id, StageContext, StageProcessor, Worker, WorkerHandle, WorkerSettings,
};
pub use types::{PollOutcome, WorkerError, WorkerRole, WorkerStatus};
