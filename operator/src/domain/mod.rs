pub mod cluster;
pub mod common;
pub mod error;
