pub mod discovery;
pub mod scanner;

pub use discovery::{discover, DiscoveryOutcome};
pub use scanner::{IndexOutcome, TradeIndexer};
