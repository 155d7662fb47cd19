pub mod config;
pub mod error;
pub mod mux;
pub mod process;
pub mod publisher;
pub mod status;
