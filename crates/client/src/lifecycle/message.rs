//! Messages accepted on the worker control channel.
//!
//! The wire shape matches what pages post: `{"type": "SKIP_WAITING"}`,
//! `{"type": "CLEAR_CACHE"}` and `{"type": "GET_CACHE_SIZE"}`. Replies are
//! `{"success": bool}` and `{"size": n}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting version without waiting for pages to close.
    SkipWaiting,
    /// Delete every generation.
    ClearCache,
    /// Report the total cached body size.
    GetCacheSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    Cleared { success: bool },
    CacheSize { size: u64 },
}
