use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::LengthDelimitedCodec;

use crate::constants::FRAME_HEADER_LEN;
use crate::constants::FRAME_OVERHEAD_BYTES;
use crate::NetworkError;
use crate::Result;
use crate::SerializationError;

/// Status words answered in plain text instead of the framed protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourLetterWord {
    /// Are you ok: answers `imok`
    Ruok,
    /// Server banner plus summary counters
    Stat,
    /// Server banner without per-connection detail
    Srvr,
    /// Tab separated monitoring key/values
    Mntr,
    /// Environment summary
    Envi,
}

impl FourLetterWord {
    pub fn parse(word: &[u8]) -> Option<Self> {
        match word {
            b"ruok" => Some(Self::Ruok),
            b"stat" => Some(Self::Stat),
            b"srvr" => Some(Self::Srvr),
            b"mntr" => Some(Self::Mntr),
            b"envi" => Some(Self::Envi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ruok => "ruok",
            Self::Stat => "stat",
            Self::Srvr => "srvr",
            Self::Mntr => "mntr",
            Self::Envi => "envi",
        }
    }
}

/// Largest frame body accepted for the configured payload bound
pub fn max_frame_len(max_data_bytes: usize) -> usize {
    max_data_bytes + FRAME_OVERHEAD_BYTES
}

/// Tokio codec for the event-loop transport and the client
pub fn frame_codec(max_frame: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(FRAME_HEADER_LEN)
        .big_endian()
        .max_frame_length(max_frame)
        .new_codec()
}

pub fn encode_body<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| SerializationError::Bincode(e).into())
}

pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    bincode::deserialize(body).map_err(|e| NetworkError::Protocol(format!("undecodable frame: {e}")).into())
}

/// Length-prefixed encoding used by the blocking transport
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = encode_body(msg)?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

pub fn write_frame<W: Write, T: Serialize>(
    writer: &mut W,
    msg: &T,
) -> Result<()> {
    let buf = encode_frame(msg)?;
    writer.write_all(&buf).map_err(NetworkError::Io)?;
    writer.flush().map_err(NetworkError::Io)?;
    Ok(())
}

/// Reads one frame body given its already-consumed length header.
pub fn read_frame_body<R: Read>(
    reader: &mut R,
    header: [u8; FRAME_HEADER_LEN],
    max_frame: usize,
) -> Result<Vec<u8>> {
    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame {
        return Err(NetworkError::FrameTooLarge { len, max: max_frame }.into());
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(NetworkError::Io)?;
    Ok(body)
}

/// Reads a frame header, returning `None` on clean end of stream
pub fn read_frame_header<R: Read>(reader: &mut R) -> Result<Option<[u8; FRAME_HEADER_LEN]>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header) {
        Ok(()) => Ok(Some(header)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(NetworkError::Io(e).into()),
    }
}

/// Reads a complete frame body, `None` on clean end of stream
pub fn read_frame<R: Read>(
    reader: &mut R,
    max_frame: usize,
) -> Result<Option<Vec<u8>>> {
    match read_frame_header(reader)? {
        Some(header) => read_frame_body(reader, header, max_frame).map(Some),
        None => Ok(None),
    }
}
