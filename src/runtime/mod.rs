pub mod args;

pub use args::{parse_command, Command, USAGE};
