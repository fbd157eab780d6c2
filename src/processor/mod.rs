//! Request processing: validation, execution against the committed state,
//! session lifecycle and status words.

mod four_letter;
mod handler;
mod request_processor;
mod stats;
pub use four_letter::*;
pub use handler::*;
pub use request_processor::*;
pub use stats::*;
