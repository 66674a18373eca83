pub mod client;
pub mod commands;
pub mod config;
pub mod errors;
pub mod logging;
