//! HTTP front end for the chunkyard engine

pub mod config;
pub mod handlers;
pub mod server;

pub use config::*;
pub use handlers::{handle_request, AppState};
pub use server::*;
