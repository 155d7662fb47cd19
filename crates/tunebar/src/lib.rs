pub mod app;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod hooks;
pub mod playlist;
pub mod runtime;
pub mod terminal;
pub mod ui;
