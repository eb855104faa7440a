// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Body notation primitives ([short], [int], [string], [long string],
//! [bytes], [string map], [string multimap]).
//!
//! Readers never panic on short input; they return `FrameError::Malformed`.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::FrameError;

fn ensure(buf: &Bytes, needed: usize, what: &str) -> Result<(), FrameError> {
    if buf.remaining() < needed {
        return Err(FrameError::Malformed(format!(
            "{what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn get_u8(buf: &mut Bytes) -> Result<u8, FrameError> {
    ensure(buf, 1, "byte")?;
    Ok(buf.get_u8())
}

pub fn get_short(buf: &mut Bytes) -> Result<u16, FrameError> {
    ensure(buf, 2, "short")?;
    Ok(buf.get_u16())
}

pub fn get_int(buf: &mut Bytes) -> Result<i32, FrameError> {
    ensure(buf, 4, "int")?;
    Ok(buf.get_i32())
}

pub fn get_string(buf: &mut Bytes) -> Result<String, FrameError> {
    let len = get_short(buf)? as usize;
    ensure(buf, len, "string")?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| FrameError::Malformed(format!("string is not UTF-8: {e}")))
}

pub fn get_long_string(buf: &mut Bytes) -> Result<String, FrameError> {
    let len = get_int(buf)?;
    if len < 0 {
        return Err(FrameError::Malformed(format!("negative long string length {len}")));
    }
    let len = len as usize;
    ensure(buf, len, "long string")?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| FrameError::Malformed(format!("long string is not UTF-8: {e}")))
}

/// `[bytes]`: an int length followed by that many bytes; a negative length is null.
pub fn get_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, FrameError> {
    let len = get_int(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    ensure(buf, len, "bytes")?;
    Ok(Some(buf.split_to(len)))
}

pub fn get_string_list(buf: &mut Bytes) -> Result<Vec<String>, FrameError> {
    let count = get_short(buf)?;
    (0..count).map(|_| get_string(buf)).collect()
}

pub fn get_string_map(buf: &mut Bytes) -> Result<HashMap<String, String>, FrameError> {
    let count = get_short(buf)?;
    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let key = get_string(buf)?;
        let value = get_string(buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

pub fn get_string_multimap(buf: &mut Bytes) -> Result<HashMap<String, Vec<String>>, FrameError> {
    let count = get_short(buf)?;
    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let key = get_string(buf)?;
        let values = get_string_list(buf)?;
        map.insert(key, values);
    }
    Ok(map)
}

pub fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

pub fn put_long_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

pub fn put_bytes(buf: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(v) => {
            buf.put_i32(v.len() as i32);
            buf.put_slice(v);
        }
        None => buf.put_i32(-1),
    }
}

pub fn put_string_list(buf: &mut BytesMut, values: &[&str]) {
    buf.put_u16(values.len() as u16);
    for value in values {
        put_string(buf, value);
    }
}

/// Entries are written in the given order.
pub fn put_string_map(buf: &mut BytesMut, entries: &[(&str, &str)]) {
    buf.put_u16(entries.len() as u16);
    for (key, value) in entries {
        put_string(buf, key);
        put_string(buf, value);
    }
}

pub fn put_string_multimap(buf: &mut BytesMut, entries: &[(&str, &[&str])]) {
    buf.put_u16(entries.len() as u16);
    for (key, values) in entries {
        put_string(buf, key);
        put_string_list(buf, values);
    }
}
