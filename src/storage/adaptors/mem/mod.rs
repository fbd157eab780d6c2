mod mem_txn_store;

pub use mem_txn_store::*;
