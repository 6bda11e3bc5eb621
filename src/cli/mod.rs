pub mod args;
pub mod run;

pub use args::{Args, Command, Toolset};
pub use run::{run, ToolSet};
