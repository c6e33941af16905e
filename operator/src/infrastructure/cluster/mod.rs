pub mod crd;
pub mod repositories;
