//! Structured logging setup for hosts embedding the agent.

mod format;

pub use format::StructuredLogger;
