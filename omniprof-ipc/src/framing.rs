//! Length-Prefixed Frame Encoding
//!
//! Provides reliable message boundaries over the pipe pair shared with the
//! interpreter-side driver. Payloads are UTF-8 JSON so that the driver can
//! speak the protocol with nothing but its standard library.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Maximum frame size (16 MB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    /// Reading or writing the pipe failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The payload is not a valid message
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Announced payload size
        size: usize,
        /// Limit in force
        max: usize,
    },

    /// The frame is structurally broken
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The peer closed the pipe between frames
    #[error("End of stream")]
    EndOfStream,
}

impl FrameError {
    /// Whether a complete frame arrived but its content was unusable, as
    /// opposed to the transport itself failing.
    pub fn is_malformed_payload(&self) -> bool {
        matches!(
            self,
            FrameError::Deserialization(_) | FrameError::FrameTooLarge { .. }
        )
    }
}

/// Write a message with length prefix to a writer
///
/// Frame format:
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | JSON payload     |
/// +----------------+------------------+
/// ```
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize,
{
    let bytes =
        serde_json::to_vec(message).map_err(|e| FrameError::Serialization(e.to_string()))?;

    let len = bytes.len();
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(len as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;

    // The driver blocks on every command; never leave one sitting in the buffer.
    writer.flush()?;

    Ok(())
}

/// Read a message with length prefix from a reader
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::EndOfStream);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }

    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::InvalidFrame(format!(
                "stream ended inside a {len}-byte frame"
            )));
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    serde_json::from_slice(&buf).map_err(|e| FrameError::Deserialization(e.to_string()))
}

/// Frame writer wrapper for convenient message sending
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
        }
    }

    /// Write a message
    pub fn write<T: Serialize>(&mut self, message: &T) -> Result<(), FrameError> {
        write_frame(&mut self.writer, message)
    }
}

/// Frame reader wrapper for convenient message receiving
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
        }
    }

    /// Read a message
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T, FrameError> {
        read_frame(&mut self.reader)
    }
}
