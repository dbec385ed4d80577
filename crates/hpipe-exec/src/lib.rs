pub mod args;
pub mod builtin;
pub mod executor;
pub mod process;
pub mod registry;

pub use args::{ArgForm, ArgSpec};
pub use executor::{Attempt, CommandExecutor, ExecContext, Executor};
pub use registry::{ExecutorFactory, ExecutorRegistry};
