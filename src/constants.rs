//! Shared constants used across the application.

/// User agent sent with page and image requests unless `USER_AGENT` overrides it.
pub const DEFAULT_USER_AGENT: &str = concat!("forum-post-relay/", env!("CARGO_PKG_VERSION"));

/// Root of the Telegram Bot API.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram accepts between 2 and 10 items per `sendMediaGroup` call.
pub const MEDIA_GROUP_MAX_ITEMS: usize = 10;

/// Longest text Telegram accepts in one `sendMessage` call, counted in characters.
pub const MESSAGE_MAX_CHARS: usize = 4096;
