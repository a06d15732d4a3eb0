pub mod cli;
pub mod config;
pub mod core;
pub mod distribution;
pub mod domain;
pub mod issuance;
pub mod storage;
