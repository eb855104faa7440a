// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimal CQL client: connect, STARTUP, QUERY.
//!
//! One request in flight at a time over a single connection. No prepared
//! statements, paging, compression or authentication.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, instrument};

use crate::codec::{get_int, get_string, get_string_multimap, put_long_string, put_string_map};
use crate::error::{ErrorCode, ProtocolError};
use crate::frame::{Frame, FrameError, Opcode, read_frame, write_frame};
use crate::result::QueryResult;

/// CQL version announced in STARTUP.
pub const CQL_VERSION: &str = "3.0.0";

const CONSISTENCY_ONE: u16 = 0x0001;

/// Client timeouts
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on establishing the TCP connection
    pub connect_timeout: Duration,
    /// Bound on each request/response exchange
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(12),
        }
    }
}

/// A single CQL connection
pub struct CqlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: SocketAddr,
    config: ClientConfig,
    next_stream: i16,
}

impl CqlClient {
    /// Resolve `host:port` and connect to the first address.
    pub async fn connect_host(
        host: &str,
        port: u16,
        config: ClientConfig,
    ) -> Result<Self, ProtocolError> {
        let target = format!("{host}:{port}");
        let addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| ProtocolError::Resolve(format!("{target}: {e}")))?
            .next()
            .ok_or_else(|| ProtocolError::Resolve(target.clone()))?;
        Self::connect(addr, config).await
    }

    #[instrument(skip(config), level = "debug")]
    pub async fn connect(addr: SocketAddr, config: ClientConfig) -> Result<Self, ProtocolError> {
        let timeout_ms = config.connect_timeout.as_millis() as u64;
        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ProtocolError::Connect {
                    addr: addr.to_string(),
                    source,
                });
            }
            Err(_) => return Err(ProtocolError::ConnectTimeout(timeout_ms)),
        };
        let _ = stream.set_nodelay(true);
        debug!(%addr, "Connected");

        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
            addr,
            config,
            next_stream: 0,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Ask the server which STARTUP options it supports.
    pub async fn options(&mut self) -> Result<HashMap<String, Vec<String>>, ProtocolError> {
        let frame = self.request(Opcode::Options, Bytes::new()).await?;
        match frame.opcode {
            Opcode::Supported => {
                let mut body = frame.body;
                Ok(get_string_multimap(&mut body)?)
            }
            other => Err(ProtocolError::UnexpectedOpcode(other)),
        }
    }

    /// Negotiate the connection. Must precede any query.
    pub async fn startup(&mut self) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        put_string_map(&mut body, &[("CQL_VERSION", CQL_VERSION)]);
        let frame = self.request(Opcode::Startup, body.freeze()).await?;
        match frame.opcode {
            Opcode::Ready => Ok(()),
            Opcode::Authenticate => {
                let mut body = frame.body;
                let authenticator = get_string(&mut body).unwrap_or_default();
                Err(ProtocolError::AuthenticationRequired(authenticator))
            }
            other => Err(ProtocolError::UnexpectedOpcode(other)),
        }
    }

    /// Run a simple statement at consistency ONE.
    pub async fn query(&mut self, cql: &str) -> Result<QueryResult, ProtocolError> {
        let mut body = BytesMut::with_capacity(cql.len() + 7);
        put_long_string(&mut body, cql);
        body.put_u16(CONSISTENCY_ONE);
        body.put_u8(0);
        let frame = self.request(Opcode::Query, body.freeze()).await?;
        match frame.opcode {
            Opcode::Result => Ok(QueryResult::decode(frame.body)?),
            other => Err(ProtocolError::UnexpectedOpcode(other)),
        }
    }

    pub async fn use_keyspace(&mut self, keyspace: &str) -> Result<(), ProtocolError> {
        match self.query(&format!("USE {keyspace}")).await? {
            QueryResult::SetKeyspace(_) => Ok(()),
            other => Err(ProtocolError::Malformed(format!(
                "USE returned {other:?} instead of a keyspace change"
            ))),
        }
    }

    /// Name of the cluster the node belongs to, from `system.local`.
    pub async fn cluster_name(&mut self) -> Result<String, ProtocolError> {
        let QueryResult::Rows(rows) = self
            .query("SELECT cluster_name FROM system.local")
            .await?
        else {
            return Err(ProtocolError::Malformed(
                "system.local query did not return rows".to_string(),
            ));
        };
        let column = rows.column_index("cluster_name").unwrap_or(0);
        rows.text(0, column).ok_or_else(|| {
            ProtocolError::Malformed("system.local returned no cluster_name".to_string())
        })
    }

    async fn request(&mut self, opcode: Opcode, body: Bytes) -> Result<Frame, ProtocolError> {
        let stream = self.next_stream;
        self.next_stream = self.next_stream.wrapping_add(1) & 0x7FFF;

        let request_timeout = self.config.request_timeout;
        let timeout_ms = request_timeout.as_millis() as u64;
        let writer = &mut self.writer;
        let reader = &mut self.reader;
        let exchange = async move {
            write_frame(writer, &Frame::request(stream, opcode, body)).await?;
            Ok::<Frame, FrameError>(read_frame(reader).await?)
        };
        let frame = tokio::time::timeout(request_timeout, exchange)
            .await
            .map_err(|_| ProtocolError::RequestTimeout(timeout_ms))??;

        if frame.stream != stream {
            return Err(ProtocolError::StreamMismatch {
                expected: stream,
                got: frame.stream,
            });
        }
        if frame.opcode == Opcode::Error {
            return Err(decode_error(frame.body));
        }
        Ok(frame)
    }
}

fn decode_error(mut body: Bytes) -> ProtocolError {
    let code = match get_int(&mut body) {
        Ok(code) => ErrorCode::from(code),
        Err(e) => return e.into(),
    };
    let message = get_string(&mut body).unwrap_or_default();
    ProtocolError::Server { code, message }
}
