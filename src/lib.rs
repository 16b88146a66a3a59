//! Content ingestion for video channels and feeds.
//!
//! Sources (YouTube channels, Vimeo users, Feedly feeds) are registered in a
//! local SQLite store; a refresh fetches each source's newest items through
//! its provider adapter, normalizes them and reconciles them against stored
//! content so repeated refreshes never duplicate anything.

pub mod config;
pub mod provider;
pub mod refresh;
pub mod storage;
pub mod util;
