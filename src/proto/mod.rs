//! Client wire protocol.
//!
//! Every frame on a client connection is a 4-byte big-endian length followed by
//! a `bincode` body. The first client frame is a [`ConnectRequest`]; afterwards
//! the client sends [`RequestFrame`]s and the server answers with
//! [`ServerMessage`]s, which also carry watch notifications.
//!
//! A connection whose first four bytes spell a [`FourLetterWord`] is a status
//! query and gets a plain-text answer instead.

mod codec;
mod message;
pub use codec::*;
pub use message::*;

#[cfg(test)]
mod codec_test;
