pub mod config;
pub mod endpoints;
pub mod entities;
pub mod members;
pub mod ports;
pub mod services;
pub mod status;
pub mod validation;
