pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod package;
pub mod requirements;
pub mod sync;
