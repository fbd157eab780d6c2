mod file_txn_store;

pub use file_txn_store::*;

#[cfg(test)]
mod file_txn_store_test;
