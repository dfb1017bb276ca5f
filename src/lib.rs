//! Browser activity capture: the native messaging bridge between the browser
//! extension and the desktop, per-site capture strategies, and the assembler
//! that turns focus changes into persisted activities.

#[macro_use]
mod utils;

pub mod activity;
pub mod bridge;
pub mod db;
pub mod domain;
pub mod error;
pub mod host;
pub mod native;
pub mod sensing;
pub mod settings;
pub mod strategies;
