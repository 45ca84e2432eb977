//! Command implementations.

use bcmap::{BlockMap, BlockMapOptions, Error, MethodCode, parse_handler, parse_hex};
use tracing::{error, info};

use crate::cli::{Cli, Commands, EXIT_BAILOUT, EXIT_FAILURE, EXIT_SUCCESS};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Dump {
            code,
            handlers,
            options,
            name,
        } => cmd_dump(name, code, handlers, options),
    }
}

/// Handle the `dump` command.
fn cmd_dump(name: &str, code: &str, handlers: &[String], options: &[String]) -> i32 {
    match dump(name, code, handlers, options) {
        Ok(map) => {
            print!("{map}");
            info!(
                blocks = map.block_count(),
                loops = map.loop_count(),
                "done"
            );
            EXIT_SUCCESS
        }
        Err(err) if err.is_bailout() => {
            error!(method = name, error = %err, "bailed out");
            EXIT_BAILOUT
        }
        Err(err) => {
            error!(method = name, error = %err, "block mapping failed");
            EXIT_FAILURE
        }
    }
}

fn dump(
    name: &str,
    code: &str,
    handlers: &[String],
    overrides: &[String],
) -> Result<BlockMap, Error> {
    let mut options = BlockMapOptions::default();
    for entry in overrides {
        options.apply(entry)?;
    }
    let handlers = handlers
        .iter()
        .map(|text| parse_handler(text))
        .collect::<Result<Vec<_>, _>>()?;
    let method = MethodCode::new(name, parse_hex(code)?).with_handlers(handlers);
    info!(method = name, size = method.code_size(), "mapping");
    Ok(BlockMap::build_method(&method, &options)?)
}
