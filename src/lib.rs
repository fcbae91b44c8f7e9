pub mod aggregation;
pub mod app;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod forecast;
pub mod keys;
pub mod logging;
pub mod state;
pub mod store;
pub mod utils;
pub mod web;
