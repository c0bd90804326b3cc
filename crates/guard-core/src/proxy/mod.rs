//! Dispatch of validated requests: failover between bindings and the fatal channel.

pub mod engine;
pub mod errors;
pub mod fatal;

pub use engine::FailoverEngine;
pub use errors::ProxyError;
pub use fatal::{fatal_channel, FatalError, FatalSender};
