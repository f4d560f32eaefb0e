//! CLI command implementations.

pub mod checksum;
pub mod doctor;
pub mod export;
pub mod history;
pub mod watch;
