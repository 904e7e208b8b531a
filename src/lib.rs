pub mod cache;
pub mod cli;
pub mod infrastructure;
pub mod service;
pub mod storage;
