pub mod cache;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod fetch;
pub mod ingest;
pub mod models;
