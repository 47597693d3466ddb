//! Terminal front end

pub mod cli;

pub use cli::RunOptions;
