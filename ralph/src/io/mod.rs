//! I/O helpers for ralph commands.

pub mod cancel;
pub mod config;
pub mod executor;
pub mod init;
pub mod prereq;
pub mod process;
pub mod task_store;
