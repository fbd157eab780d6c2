//! Write-ahead transaction log and periodic snapshots.
mod adaptors;
mod snapshot;
mod txn;
mod txn_store;

pub use adaptors::*;
pub use snapshot::*;
pub use txn::*;
pub use txn_store::*;

#[cfg(test)]
mod storage_test;
