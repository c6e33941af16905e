pub mod exec;
pub mod network;
pub mod raft;
pub mod resources;
pub mod workload;
