//! Feedwatch: keyword alerts for web feeds, delivered to chat.

pub mod channels;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod restart;
pub mod rules;
pub mod stats;
pub mod store;

/// Exit status asking the supervisor to respawn the process (EX_TEMPFAIL).
pub const RESTART_EXIT_CODE: i32 = 75;
