pub mod aws;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod utils;
