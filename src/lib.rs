//! upfeed: merge RSS/Atom channels into one chronological feed, with
//! bookmarks kept offline.
//!
//! - [`feed`] fetches and normalizes single channels
//! - [`aggregate`] runs passes over many channels
//! - [`storage`] persists channels, categories, bookmarks and settings
//! - [`config`] reads `~/.config/upfeed/config.toml`

pub mod aggregate;
pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
