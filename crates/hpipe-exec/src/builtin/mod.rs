pub mod odps;
pub mod shell;
