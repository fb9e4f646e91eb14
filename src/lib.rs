pub mod api;
pub mod app;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod notifier;
pub mod queue;
pub mod store;
pub mod utils;
