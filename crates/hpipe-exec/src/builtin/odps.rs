//! Managed-warehouse jobs run through the `odpscmd` client.

use crate::args::ArgSpec;
use crate::executor::CommandExecutor;

pub const JOB_TYPE: &str = "odps";
pub const DEFAULT_PROGRAM: &str = "odpscmd";

pub const REQUIRED: &[&str] = &["access_id", "access_key", "project", "endpoint", "cmd"];

pub const ARGS: &[ArgSpec] = &[
    ArgSpec::separate("access_id", "-u"),
    ArgSpec::separate("access_key", "-p"),
    ArgSpec::joined("project", "--project="),
    ArgSpec::joined("endpoint", "--endpoint="),
    ArgSpec::separate("cmd", "-e"),
];

pub fn executor(program: Option<&str>) -> CommandExecutor {
    CommandExecutor::new(
        JOB_TYPE,
        program.unwrap_or(DEFAULT_PROGRAM),
        REQUIRED,
        ARGS,
    )
}
