pub mod cli;
pub mod load_config;
pub mod remote;
pub mod render;

pub use cli::{run, Cli, Commands};
