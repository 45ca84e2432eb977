//! CLI definitions.

use clap::{Parser, Subcommand};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for malformed input and internal errors.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for methods the block mapper bails out on.
pub const EXIT_BAILOUT: i32 = 2;

#[derive(Parser)]
#[command(name = "bcmap")]
#[command(about = "JVM bytecode block mapper - prints loop-annotated basic blocks")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and print the block map of one method
    Dump {
        /// Method bytecode as hex
        #[arg(long, value_name = "HEX")]
        code: String,

        /// Exception table entry, in priority order
        #[arg(long = "handler", value_name = "START:END:HANDLER[:TYPE]")]
        handlers: Vec<String>,

        /// Block mapping option override
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Method name shown in diagnostics
        #[arg(long, default_value = "method")]
        name: String,
    },
}
