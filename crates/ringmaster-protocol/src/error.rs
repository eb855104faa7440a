// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client-side error types and server error codes.

use std::fmt;

use thiserror::Error;

use crate::frame::{FrameError, Opcode};

/// Error codes carried in ERROR response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ServerError,
    Protocol,
    BadCredentials,
    Unavailable,
    Overloaded,
    IsBootstrapping,
    Truncate,
    WriteTimeout,
    ReadTimeout,
    ReadFailure,
    FunctionFailure,
    WriteFailure,
    Syntax,
    Unauthorized,
    Invalid,
    Config,
    AlreadyExists,
    Unprepared,
    Other(i32),
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::ServerError => 0x0000,
            ErrorCode::Protocol => 0x000A,
            ErrorCode::BadCredentials => 0x0100,
            ErrorCode::Unavailable => 0x1000,
            ErrorCode::Overloaded => 0x1001,
            ErrorCode::IsBootstrapping => 0x1002,
            ErrorCode::Truncate => 0x1003,
            ErrorCode::WriteTimeout => 0x1100,
            ErrorCode::ReadTimeout => 0x1200,
            ErrorCode::ReadFailure => 0x1300,
            ErrorCode::FunctionFailure => 0x1400,
            ErrorCode::WriteFailure => 0x1500,
            ErrorCode::Syntax => 0x2000,
            ErrorCode::Unauthorized => 0x2100,
            ErrorCode::Invalid => 0x2200,
            ErrorCode::Config => 0x2300,
            ErrorCode::AlreadyExists => 0x2400,
            ErrorCode::Unprepared => 0x2500,
            ErrorCode::Other(code) => code,
        }
    }

    /// One-line human readable classification of the failure.
    pub fn describe(self) -> &'static str {
        match self {
            ErrorCode::ServerError => "the server hit an internal error",
            ErrorCode::Protocol => "the server rejected the request as a protocol violation",
            ErrorCode::BadCredentials => "authentication failed",
            ErrorCode::Unavailable => "not enough replicas were alive to satisfy the consistency level",
            ErrorCode::Overloaded => "the coordinator is overloaded",
            ErrorCode::IsBootstrapping => "the coordinator is still bootstrapping",
            ErrorCode::Truncate => "the truncate operation failed",
            ErrorCode::WriteTimeout => "replicas did not acknowledge the write in time",
            ErrorCode::ReadTimeout => "replicas did not answer the read in time",
            ErrorCode::ReadFailure => "replicas failed to serve the read",
            ErrorCode::FunctionFailure => "a user-defined function failed",
            ErrorCode::WriteFailure => "replicas failed to apply the write",
            ErrorCode::Syntax => "the statement has a syntax error",
            ErrorCode::Unauthorized => "the user is not allowed to perform this operation",
            ErrorCode::Invalid => "the query is syntactically correct but invalid",
            ErrorCode::Config => "the query conflicts with the server configuration",
            ErrorCode::AlreadyExists => "the keyspace or table already exists",
            ErrorCode::Unprepared => "the prepared statement is unknown to the server",
            ErrorCode::Other(_) => "the server returned an unrecognised error",
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            0x0000 => ErrorCode::ServerError,
            0x000A => ErrorCode::Protocol,
            0x0100 => ErrorCode::BadCredentials,
            0x1000 => ErrorCode::Unavailable,
            0x1001 => ErrorCode::Overloaded,
            0x1002 => ErrorCode::IsBootstrapping,
            0x1003 => ErrorCode::Truncate,
            0x1100 => ErrorCode::WriteTimeout,
            0x1200 => ErrorCode::ReadTimeout,
            0x1300 => ErrorCode::ReadFailure,
            0x1400 => ErrorCode::FunctionFailure,
            0x1500 => ErrorCode::WriteFailure,
            0x2000 => ErrorCode::Syntax,
            0x2100 => ErrorCode::Unauthorized,
            0x2200 => ErrorCode::Invalid,
            0x2300 => ErrorCode::Config,
            0x2400 => ErrorCode::AlreadyExists,
            0x2500 => ErrorCode::Unprepared,
            other => ErrorCode::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "{code:#06x}"),
            known => write!(f, "{known:?} ({:#06x})", known.code()),
        }
    }
}

/// Errors that can occur while talking to a node
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("request timed out after {0}ms")]
    RequestTimeout(u64),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("server error {code}: {message}")]
    Server { code: ErrorCode, message: String },

    #[error("server requires authentication ({0})")]
    AuthenticationRequired(String),

    #[error("unexpected {0:?} response")]
    UnexpectedOpcode(Opcode),

    #[error("response stream {got} does not match request stream {expected}")]
    StreamMismatch { expected: i16, got: i16 },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// True when the failure happened at the transport level: nothing is
    /// listening, the connection dropped, or the peer went silent.
    pub fn is_transport(&self) -> bool {
        match self {
            ProtocolError::Connect { .. }
            | ProtocolError::ConnectTimeout(_)
            | ProtocolError::RequestTimeout(_) => true,
            ProtocolError::Frame(FrameError::Io(_) | FrameError::ConnectionClosed) => true,
            _ => false,
        }
    }

    pub fn server_code(&self) -> Option<ErrorCode> {
        match self {
            ProtocolError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ErrorCode::from(0x2200), ErrorCode::Invalid);
        assert_eq!(ErrorCode::from(0x1002), ErrorCode::IsBootstrapping);
        assert_eq!(ErrorCode::from(0x7777), ErrorCode::Other(0x7777));
        assert_eq!(ErrorCode::Syntax.code(), 0x2000);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Invalid.to_string(), "Invalid (0x2200)");
        assert_eq!(ErrorCode::Other(0x42).to_string(), "0x0042");
    }

    #[test]
    fn test_transport_classification() {
        let refused = ProtocolError::Connect {
            addr: "127.0.0.1:9042".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(refused.is_transport());
        assert!(ProtocolError::ConnectTimeout(100).is_transport());
        assert!(ProtocolError::Frame(FrameError::ConnectionClosed).is_transport());

        let server = ProtocolError::Server {
            code: ErrorCode::IsBootstrapping,
            message: "bootstrapping".to_string(),
        };
        assert!(!server.is_transport());
        assert_eq!(server.server_code(), Some(ErrorCode::IsBootstrapping));
        assert!(!ProtocolError::Malformed("x".into()).is_transport());
    }
}
