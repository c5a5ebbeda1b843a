//! Per-instance log streaming: upstream source, stream state, multiplexer.

mod multiplexer;
pub mod parse;
pub mod process;
mod source;
mod stream;

pub use multiplexer::{LogConfig, LogMultiplexer};
pub use parse::parse_line;
pub use process::CommandLogSource;
pub use source::{LogHandler, LogSource, UpstreamStatus, UpstreamSubscription};
pub use stream::LogStream;
