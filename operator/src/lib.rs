pub mod application;
pub mod args;
pub mod domain;
pub mod infrastructure;
