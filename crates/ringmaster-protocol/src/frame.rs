// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for CQL native protocol v4 frames.
//!
//! Every request and response is one frame:
//! - 1 byte: version (0x04 request, 0x84 response)
//! - 1 byte: flags (compression and tracing, always 0 here)
//! - 2 bytes: stream id (big-endian, signed)
//! - 1 byte: opcode
//! - 4 bytes: body length (big-endian)
//! - N bytes: body

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size accepted by the server (256 MB)
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Frame header size
pub const HEADER_SIZE: usize = 9;

/// Protocol version sent on requests.
pub const REQUEST_VERSION: u8 = 0x04;

/// Protocol version carried by responses.
pub const RESPONSE_VERSION: u8 = 0x84;

const DIRECTION_MASK: u8 = 0x80;

/// Frame opcodes used by the readiness check, the statement runner and the stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
    Batch = 0x0D,
    AuthChallenge = 0x0E,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0x00 => Ok(Opcode::Error),
            0x01 => Ok(Opcode::Startup),
            0x02 => Ok(Opcode::Ready),
            0x03 => Ok(Opcode::Authenticate),
            0x05 => Ok(Opcode::Options),
            0x06 => Ok(Opcode::Supported),
            0x07 => Ok(Opcode::Query),
            0x08 => Ok(Opcode::Result),
            0x09 => Ok(Opcode::Prepare),
            0x0A => Ok(Opcode::Execute),
            0x0B => Ok(Opcode::Register),
            0x0C => Ok(Opcode::Event),
            0x0D => Ok(Opcode::Batch),
            0x0E => Ok(Opcode::AuthChallenge),
            0x0F => Ok(Opcode::AuthResponse),
            0x10 => Ok(Opcode::AuthSuccess),
            _ => Err(FrameError::InvalidOpcode(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    #[error("unsupported protocol version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("malformed frame body: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A CQL frame with its header fields and raw body
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
    pub opcode: Opcode,
    pub body: Bytes,
}

impl Frame {
    /// Create a client-to-server frame.
    pub fn request(stream: i16, opcode: Opcode, body: Bytes) -> Self {
        Self {
            version: REQUEST_VERSION,
            flags: 0,
            stream,
            opcode,
            body,
        }
    }

    /// Create a server-to-client frame.
    pub fn response(stream: i16, opcode: Opcode, body: Bytes) -> Self {
        Self {
            version: RESPONSE_VERSION,
            flags: 0,
            stream,
            opcode,
            body,
        }
    }

    pub fn is_response(&self) -> bool {
        self.version & DIRECTION_MASK != 0
    }

    /// Encode the frame to bytes for wire transmission
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        if self.body.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(self.body.len()));
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_i16(self.stream);
        buf.put_u8(self.opcode as u8);
        buf.put_u32(self.body.len() as u32);
        buf.put(self.body.clone());
        Ok(buf.freeze())
    }

    /// Decode a frame from a complete buffer
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame header",
            )));
        }

        let version = check_version(bytes.get_u8())?;
        let flags = bytes.get_u8();
        let stream = bytes.get_i16();
        let opcode = Opcode::try_from(bytes.get_u8())?;
        let length = bytes.get_u32() as usize;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }

        if bytes.len() < length {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame body",
            )));
        }

        Ok(Self {
            version,
            flags,
            stream,
            opcode,
            body: bytes.split_to(length),
        })
    }
}

fn check_version(version: u8) -> Result<u8, FrameError> {
    if version & !DIRECTION_MASK != REQUEST_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }
    Ok(version)
}

/// Write a frame to an async writer and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode()?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame from an async reader
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let version = check_version(header[0])?;
    let flags = header[1];
    let stream = i16::from_be_bytes([header[2], header[3]]);
    let opcode = Opcode::try_from(header[4])?;
    let length = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut body = vec![0u8; length];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Frame {
        version,
        flags,
        stream,
        opcode,
        body: Bytes::from(body),
    })
}
