pub mod aggregator;
pub mod backend;
pub mod colors;
pub mod config;
pub mod error;
pub mod handler;
pub mod views;
