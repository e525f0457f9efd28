#![forbid(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod guard;
pub mod models;
pub mod risk;
pub mod scenario;
pub mod sqlite;
pub mod telemetry;
pub mod utils;

pub use cli::app::{Cli, Command};
pub use error::{PlanError, Result};
