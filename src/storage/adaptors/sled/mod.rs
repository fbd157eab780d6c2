mod sled_txn_store;

pub use sled_txn_store::*;

#[cfg(test)]
mod sled_txn_store_test;
