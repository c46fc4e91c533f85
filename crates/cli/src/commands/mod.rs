//! CLI command implementations

pub mod health;
pub mod limits;
pub mod status;
pub mod watch;
