//! # docbase-cli
//!
//! Command-line front end for a docbase knowledge base: upload PDF or text
//! files, embed them, and ask questions answered from their content.
//!
//! The binary is a thin wrapper around [`cli::run`]; the modules are public
//! so the commands can be driven from tests or other tools.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod extract;

pub use app::App;
pub use cli::{Cli, Command};
pub use config::{AppConfig, EmbeddingBackend, LanguageModelConfig, Overrides};
