pub mod client;
pub mod decoder;

pub use client::{LogSource, RawLog, RpcLogSource};
