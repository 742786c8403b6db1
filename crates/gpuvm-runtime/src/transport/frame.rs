use crate::error::TransportError;
use alloc::{string::ToString, vec::Vec};
use serde::{Serialize, de::DeserializeOwned};

pub(crate) type Frame = Vec<u8>;

/// Frames larger than this are rejected when read from a stream.
#[cfg(unix)]
const MAX_FRAME_SIZE: usize = 1 << 20;

pub(crate) fn encode<T: Serialize>(message: &T) -> Result<Frame, TransportError> {
    serde_json::to_vec(message).map_err(|err| TransportError::Io(err.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(frame).map_err(|err| TransportError::Io(err.to_string()))
}

/// Write a frame prefixed with its little-endian `u32` length.
#[cfg(unix)]
pub(crate) fn write_frame(mut writer: impl std::io::Write, frame: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(frame.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame is too large")
        })?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(frame)?;
    writer.flush()
}

/// Read the next frame, or `None` when the stream ended between two frames.
#[cfg(unix)]
pub(crate) fn read_frame(reader: &mut impl std::io::Read) -> std::io::Result<Option<Frame>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            alloc::format!("frame of {len} bytes exceeds {MAX_FRAME_SIZE}"),
        ));
    }

    let mut frame = alloc::vec![0u8; len];
    reader.read_exact(&mut frame)?;
    Ok(Some(frame))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_are_read_back_in_order() {
        let mut stream = Vec::new();
        write_frame(&mut stream, b"first").unwrap();
        write_frame(&mut stream, b"").unwrap();

        let mut reader = Cursor::new(stream);
        assert_eq!(read_frame(&mut reader).unwrap(), Some(b"first".to_vec()));
        assert_eq!(read_frame(&mut reader).unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut reader).unwrap(), None);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut stream = Vec::new();
        write_frame(&mut stream, b"truncated").unwrap();
        stream.truncate(stream.len() - 2);

        assert!(read_frame(&mut Cursor::new(stream)).is_err());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let stream = (MAX_FRAME_SIZE as u32 + 1).to_le_bytes().to_vec();

        let err = read_frame(&mut Cursor::new(stream)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
