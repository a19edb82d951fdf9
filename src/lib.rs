//! Kinboard: owner-scoped records, reminders and attachments behind a JSON API.

pub mod attachments;
pub mod audit;
pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod family;
pub mod files_validation;
pub mod http;
pub mod id;
pub mod import;
pub mod logging;
pub mod migrate;
mod op_log;
pub mod query;
pub mod reminder_poller;
pub mod reminders;
pub mod repo;
pub mod schema;
pub mod security;
pub mod state;
pub mod stats;
pub mod time;

pub use error::{AppError, AppResult, ErrorKind};
