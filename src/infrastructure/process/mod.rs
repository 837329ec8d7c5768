pub mod cli_fallback;

pub use cli_fallback::{item_path, CliCreateOutcome, CliRunner, FabCli};
