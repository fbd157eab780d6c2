mod lifecycle;
pub use lifecycle::*;

#[cfg(test)]
mod lifecycle_test;
