pub mod app;
pub mod artifacts;
pub mod auth;
pub mod collate;
pub mod config;
pub mod error;
pub mod extract;
pub mod names;
pub mod receipt;
pub mod session;
pub mod state;
pub mod tables;
pub mod wizard;
