#![forbid(unsafe_code)]

pub mod app;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod extract;
pub mod formats;
pub mod identifiers;
pub mod line_cache;
pub mod logging;
pub mod readme;
pub mod sample;
pub mod store;
pub mod vcs;

pub use error::{Error, Result};
