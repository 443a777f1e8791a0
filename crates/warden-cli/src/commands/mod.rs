pub mod audit;
pub mod config;
pub mod engine;
pub mod init;
pub mod policy;
pub mod simulate;
pub mod trace;
