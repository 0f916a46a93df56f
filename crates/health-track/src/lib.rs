//! Health Track - Command-line application
//!
//! Thin layer over `health-track-lib`: argument parsing, logging setup and one function per
//! subcommand.

pub mod commands;
pub mod logging;
pub mod settings;

pub use commands::run;
pub use settings::Settings;
