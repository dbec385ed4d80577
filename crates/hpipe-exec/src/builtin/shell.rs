//! Plain shell commands: `bash -c <cmd>`.

use crate::args::ArgSpec;
use crate::executor::CommandExecutor;

pub const JOB_TYPE: &str = "shell";
pub const DEFAULT_PROGRAM: &str = "bash";

pub const REQUIRED: &[&str] = &["cmd"];

pub const ARGS: &[ArgSpec] = &[ArgSpec::separate("cmd", "-c")];

pub fn executor(program: Option<&str>) -> CommandExecutor {
    CommandExecutor::new(
        JOB_TYPE,
        program.unwrap_or(DEFAULT_PROGRAM),
        REQUIRED,
        ARGS,
    )
}
