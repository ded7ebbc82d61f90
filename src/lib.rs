pub mod confidence;
pub mod config;
pub mod dates;
pub mod dedupe;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod health;
pub mod logging;
pub mod pipeline;
pub mod rate_limit;
pub mod runner;
pub mod storage;
pub mod types;
