// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RESULT body decoding.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::{get_bytes, get_int, get_short, get_string};
use crate::frame::FrameError;

const KIND_VOID: i32 = 0x0001;
const KIND_ROWS: i32 = 0x0002;
const KIND_SET_KEYSPACE: i32 = 0x0003;
const KIND_PREPARED: i32 = 0x0004;
const KIND_SCHEMA_CHANGE: i32 = 0x0005;

const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const FLAG_NO_METADATA: i32 = 0x0004;

/// Decoded RESULT message.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    Prepared,
    SchemaChange {
        change_type: String,
        target: String,
        keyspace: String,
    },
}

/// Column value types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, ColumnType)>,
    },
    Tuple(Vec<ColumnType>),
}

impl ColumnType {
    pub(crate) fn id(&self) -> u16 {
        match self {
            ColumnType::Custom(_) => 0x0000,
            ColumnType::Ascii => 0x0001,
            ColumnType::Bigint => 0x0002,
            ColumnType::Blob => 0x0003,
            ColumnType::Boolean => 0x0004,
            ColumnType::Counter => 0x0005,
            ColumnType::Decimal => 0x0006,
            ColumnType::Double => 0x0007,
            ColumnType::Float => 0x0008,
            ColumnType::Int => 0x0009,
            ColumnType::Timestamp => 0x000B,
            ColumnType::Uuid => 0x000C,
            ColumnType::Varchar => 0x000D,
            ColumnType::Varint => 0x000E,
            ColumnType::Timeuuid => 0x000F,
            ColumnType::Inet => 0x0010,
            ColumnType::Date => 0x0011,
            ColumnType::Time => 0x0012,
            ColumnType::Smallint => 0x0013,
            ColumnType::Tinyint => 0x0014,
            ColumnType::List(_) => 0x0020,
            ColumnType::Map(_, _) => 0x0021,
            ColumnType::Set(_) => 0x0022,
            ColumnType::Udt { .. } => 0x0030,
            ColumnType::Tuple(_) => 0x0031,
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, FrameError> {
        let id = get_short(buf)?;
        let ty = match id {
            0x0000 => ColumnType::Custom(get_string(buf)?),
            0x0001 => ColumnType::Ascii,
            0x0002 => ColumnType::Bigint,
            0x0003 => ColumnType::Blob,
            0x0004 => ColumnType::Boolean,
            0x0005 => ColumnType::Counter,
            0x0006 => ColumnType::Decimal,
            0x0007 => ColumnType::Double,
            0x0008 => ColumnType::Float,
            0x0009 => ColumnType::Int,
            0x000B => ColumnType::Timestamp,
            0x000C => ColumnType::Uuid,
            0x000D => ColumnType::Varchar,
            0x000E => ColumnType::Varint,
            0x000F => ColumnType::Timeuuid,
            0x0010 => ColumnType::Inet,
            0x0011 => ColumnType::Date,
            0x0012 => ColumnType::Time,
            0x0013 => ColumnType::Smallint,
            0x0014 => ColumnType::Tinyint,
            0x0020 => ColumnType::List(Box::new(Self::decode(buf)?)),
            0x0021 => {
                let key = Self::decode(buf)?;
                let value = Self::decode(buf)?;
                ColumnType::Map(Box::new(key), Box::new(value))
            }
            0x0022 => ColumnType::Set(Box::new(Self::decode(buf)?)),
            0x0030 => {
                let keyspace = get_string(buf)?;
                let name = get_string(buf)?;
                let count = get_short(buf)?;
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let field = get_string(buf)?;
                    fields.push((field, Self::decode(buf)?));
                }
                ColumnType::Udt {
                    keyspace,
                    name,
                    fields,
                }
            }
            0x0031 => {
                let count = get_short(buf)?;
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(Self::decode(buf)?);
                }
                ColumnType::Tuple(elements)
            }
            other => {
                return Err(FrameError::Malformed(format!(
                    "unknown column type {other:#06x}"
                )));
            }
        };
        Ok(ty)
    }
}

/// Column metadata from a ROWS result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub column_type: ColumnType,
}

/// ROWS result: column metadata plus raw cell values.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<Option<Bytes>>>,
    pub has_more_pages: bool,
}

impl Rows {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Text value of a cell, when the column is textual.
    pub fn text(&self, row: usize, column: usize) -> Option<String> {
        let spec = self.columns.get(column)?;
        if !matches!(spec.column_type, ColumnType::Varchar | ColumnType::Ascii) {
            return None;
        }
        let cell = self.rows.get(row)?.get(column)?.as_ref()?;
        Some(String::from_utf8_lossy(cell).into_owned())
    }

    /// Every cell of a row rendered for display.
    pub fn render_row(&self, row: usize) -> Vec<String> {
        let Some(cells) = self.rows.get(row) else {
            return Vec::new();
        };
        self.columns
            .iter()
            .zip(cells)
            .map(|(spec, cell)| render_value(&spec.column_type, cell.as_ref()))
            .collect()
    }
}

/// Render a single cell. Types without a dedicated rendering are shown as hex.
pub fn render_value(column_type: &ColumnType, value: Option<&Bytes>) -> String {
    let Some(value) = value else {
        return "null".to_string();
    };
    let raw = value.as_ref();
    let rendered = match column_type {
        ColumnType::Ascii | ColumnType::Varchar => {
            Some(String::from_utf8_lossy(raw).into_owned())
        }
        ColumnType::Int => fixed::<4>(raw).map(|b| i32::from_be_bytes(b).to_string()),
        ColumnType::Bigint | ColumnType::Counter | ColumnType::Timestamp => {
            fixed::<8>(raw).map(|b| i64::from_be_bytes(b).to_string())
        }
        ColumnType::Smallint => fixed::<2>(raw).map(|b| i16::from_be_bytes(b).to_string()),
        ColumnType::Tinyint => fixed::<1>(raw).map(|b| (b[0] as i8).to_string()),
        ColumnType::Double => fixed::<8>(raw).map(|b| f64::from_be_bytes(b).to_string()),
        ColumnType::Float => fixed::<4>(raw).map(|b| f32::from_be_bytes(b).to_string()),
        ColumnType::Boolean => fixed::<1>(raw).map(|b| (b[0] != 0).to_string()),
        ColumnType::Uuid | ColumnType::Timeuuid => {
            fixed::<16>(raw).map(|b| Uuid::from_bytes(b).to_string())
        }
        ColumnType::Inet => match raw.len() {
            4 => fixed::<4>(raw).map(|b| IpAddr::V4(Ipv4Addr::from(b)).to_string()),
            16 => fixed::<16>(raw).map(|b| IpAddr::V6(Ipv6Addr::from(b)).to_string()),
            _ => None,
        },
        _ => None,
    };
    rendered.unwrap_or_else(|| hex_literal(raw))
}

fn fixed<const N: usize>(raw: &[u8]) -> Option<[u8; N]> {
    raw.try_into().ok()
}

fn hex_literal(raw: &[u8]) -> String {
    format!("0x{}", hex::encode(raw))
}

impl QueryResult {
    pub fn decode(mut body: Bytes) -> Result<Self, FrameError> {
        let kind = get_int(&mut body)?;
        match kind {
            KIND_VOID => Ok(QueryResult::Void),
            KIND_ROWS => Ok(QueryResult::Rows(decode_rows(&mut body)?)),
            KIND_SET_KEYSPACE => Ok(QueryResult::SetKeyspace(get_string(&mut body)?)),
            KIND_PREPARED => Ok(QueryResult::Prepared),
            KIND_SCHEMA_CHANGE => {
                let change_type = get_string(&mut body)?;
                let target = get_string(&mut body)?;
                let keyspace = get_string(&mut body)?;
                Ok(QueryResult::SchemaChange {
                    change_type,
                    target,
                    keyspace,
                })
            }
            other => Err(FrameError::Malformed(format!("unknown result kind {other}"))),
        }
    }
}

fn decode_rows(body: &mut Bytes) -> Result<Rows, FrameError> {
    let flags = get_int(body)?;
    let column_count = get_int(body)?;
    if column_count < 0 {
        return Err(FrameError::Malformed(format!(
            "negative column count {column_count}"
        )));
    }

    let has_more_pages = flags & FLAG_HAS_MORE_PAGES != 0;
    if has_more_pages {
        // paging state is irrelevant for single-page reads
        get_bytes(body)?;
    }

    // counts come off the wire; every entry takes at least one byte
    let mut columns = Vec::with_capacity((column_count as usize).min(body.len()));
    if flags & FLAG_NO_METADATA == 0 {
        let global = if flags & FLAG_GLOBAL_TABLES_SPEC != 0 {
            Some((get_string(body)?, get_string(body)?))
        } else {
            None
        };
        for _ in 0..column_count {
            let (keyspace, table) = match &global {
                Some((ks, table)) => (ks.clone(), table.clone()),
                None => (get_string(body)?, get_string(body)?),
            };
            let name = get_string(body)?;
            let column_type = ColumnType::decode(body)?;
            columns.push(ColumnSpec {
                keyspace,
                table,
                name,
                column_type,
            });
        }
    }

    let row_count = get_int(body)?;
    if row_count < 0 {
        return Err(FrameError::Malformed(format!("negative row count {row_count}")));
    }
    let mut rows = Vec::with_capacity((row_count as usize).min(body.len()));
    for _ in 0..row_count {
        let mut row = Vec::with_capacity((column_count as usize).min(body.len()));
        for _ in 0..column_count {
            row.push(get_bytes(body)?);
        }
        rows.push(row);
    }

    Ok(Rows {
        columns,
        rows,
        has_more_pages,
    })
}
