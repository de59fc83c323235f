//! Utility modules.

pub mod retry;
pub mod text;

pub use retry::{RetryConfig, Retryable, with_retry};
pub use text::{
    calculate_checksum, has_meaningful_content, is_plausible_rewrite, slugify, truncate_chars,
};
