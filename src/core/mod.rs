pub mod alerts;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod parser;
pub mod snapshot;
pub mod state;
pub mod status;
