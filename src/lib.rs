//! Real-time poll backend: once-per-user votes and comment hearts, with every
//! change pushed to live clients by both the API and a change-feed watcher.

#[macro_use]
extern crate tracing;

pub mod auth;
pub mod commit;
pub mod config;
pub mod db;
pub mod error;
pub mod polls;
pub mod realtime;
pub mod routes;
pub mod startup;
pub mod watcher;
