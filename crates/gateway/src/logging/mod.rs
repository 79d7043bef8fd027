pub mod buffer;
pub mod files;

pub use buffer::{LogBuffer, LogBufferLayer, LogEntry, LogFilter, LogLevel, LogQueryResult};
