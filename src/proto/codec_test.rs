use std::io::Cursor;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::*;
use crate::Error;
use crate::NetworkError;
use crate::SystemError;

#[test]
fn four_letter_words_are_recognised() {
    assert_eq!(FourLetterWord::parse(b"ruok"), Some(FourLetterWord::Ruok));
    assert_eq!(FourLetterWord::parse(b"mntr"), Some(FourLetterWord::Mntr));
    assert_eq!(FourLetterWord::parse(b"RUOK"), None);
    assert_eq!(FourLetterWord::parse(&[0, 0, 0, 12]), None);
}

#[test]
fn four_letter_word_header_exceeds_any_frame_limit() {
    // A status word can never be mistaken for a legal frame length
    let len = u32::from_be_bytes(*b"ruok") as usize;
    assert!(len > max_frame_len(1024 * 1024));
}

#[test]
fn blocking_frame_is_readable_by_tokio_codec() {
    let frame = RequestFrame {
        xid: 7,
        request: Request::GetData {
            path: "/foo".into(),
            watch: true,
        },
    };
    let encoded = encode_frame(&frame).unwrap();

    let mut codec = frame_codec(max_frame_len(1024));
    let mut buf = BytesMut::from(&encoded[..]);
    let body = codec.decode(&mut buf).unwrap().expect("complete frame");

    let decoded: RequestFrame = decode_body(&body).unwrap();
    assert_eq!(decoded, frame);
}

#[test]
fn read_frame_returns_none_on_clean_eof() {
    let mut reader = Cursor::new(Vec::<u8>::new());
    assert!(read_frame(&mut reader, 1024).unwrap().is_none());
}

#[test]
fn read_frame_rejects_oversized_length() {
    let mut data = (10_000u32).to_be_bytes().to_vec();
    data.extend_from_slice(&[0u8; 16]);
    let mut reader = Cursor::new(data);

    match read_frame(&mut reader, 1024) {
        Err(Error::System(SystemError::Network(NetworkError::FrameTooLarge { len, max }))) => {
            assert_eq!(len, 10_000);
            assert_eq!(max, 1024);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn decode_body_reports_protocol_error_on_garbage() {
    let result: crate::Result<RequestFrame> = decode_body(&[0xff, 0xff, 0xff]);
    assert!(matches!(
        result,
        Err(Error::System(SystemError::Network(NetworkError::Protocol(_))))
    ));
}

#[test]
fn create_mode_flags() {
    assert!(CreateMode::EphemeralSequential.is_ephemeral());
    assert!(CreateMode::EphemeralSequential.is_sequential());
    assert!(!CreateMode::Persistent.is_ephemeral());
    assert!(CreateMode::PersistentSequential.is_sequential());
}
