// Library for tests to access modules

pub mod aggregator;
pub mod config;
pub mod domains;
pub mod error;
pub mod fan_out;
pub mod gpu_repo;
pub mod models;
pub mod probe;
pub mod pump;
pub mod routes;
pub mod sysinfo_repo;
pub mod version;
