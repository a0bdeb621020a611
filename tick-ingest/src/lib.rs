// tick-ingest: exchange trade feed -> bounded tick log -> batched storage writes

pub mod cli;
pub mod config;
pub mod exchange;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod stream;
