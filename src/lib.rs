pub mod config;
pub mod core;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;
