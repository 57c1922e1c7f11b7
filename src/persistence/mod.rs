pub mod memory;

pub use memory::TradeStore;
