//! telemux agent: host metrics sampling, per-instance log multiplexing and
//! websocket fan-out to subscribers.

pub mod cache;
pub mod config;
pub mod error;
pub mod fanout;
pub mod history;
pub mod host;
pub mod logs;
pub mod sampler;
pub mod state;
pub mod task;
pub mod types;
pub mod ws;
