//! Stage processors, one per worker role.

mod publish;
mod resolve;
mod transfer;

pub use publish::PublishStage;
pub use resolve::ResolveStage;
pub use transfer::TransferStage;
