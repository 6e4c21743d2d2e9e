//! Forum post relay library.
//!
//! Watches a single forum thread page and forwards each new post, with its
//! quoted context, links and images, to a Telegram chat exactly once.

pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod fetch;
pub mod forum;
pub mod notify;
pub mod pipeline;
