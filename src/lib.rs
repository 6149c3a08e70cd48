//! Library crate for scan-report-bot exposing reusable modules.
pub mod bot;
pub mod config;
pub mod conversation;
pub mod executor;
pub mod geo;
pub mod intake;
pub mod logging;
pub mod messenger;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod server;
pub mod types;
