//! Core domain + application logic for the VK publishing bot.
//!
//! Framework-agnostic: Telegram, VK, ffmpeg and SQLite live behind ports (traits)
//! implemented in adapter crates.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod media;
pub mod messaging;
pub mod pkce;
pub mod plan;
pub mod ports;
pub mod publish_time;
pub mod publisher;
pub mod scheduler;
pub mod session;
pub mod tokens;

#[cfg(test)]
mod testkit;

pub use errors::{Error, Result};
