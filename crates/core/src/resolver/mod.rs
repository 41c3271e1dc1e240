//! Link resolution: source page to direct transfer URL.

mod http;
mod types;

pub use http::HttpResolver;
pub use types::{ResolveError, Resolver};
