pub mod execution;

pub use execution::{CommandError, CommandOutput, run_command};
