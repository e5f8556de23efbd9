//! CLI command implementations

pub mod debug;
pub mod init;
