//! Publishing: local file to permanent reference.

mod caption;
mod telegram;
mod types;

pub use caption::{format_caption, MAX_CAPTION_CHARS};
pub use telegram::TelegramPublisher;
pub use types::{PublishError, PublishedRef, Publisher};
