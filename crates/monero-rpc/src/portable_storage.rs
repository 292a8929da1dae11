//! Epee portable storage binary format.
//!
//! Used by the node's `.bin` endpoints. Parameters are supplied as JSON and
//! encoded here; responses are returned to the caller as raw bytes.

use crate::error::RpcError;
use serde_json::{Map, Value};

// =============================================================================
// Constants
// =============================================================================

/// Portable storage signature bytes.
const SIGNATURE_A: u32 = 0x0111_0101;
const SIGNATURE_B: u32 = 0x0101_0201;

/// Current storage format version.
const FORMAT_VER: u8 = 1;

/// Type tags.
const TYPE_INT64: u8 = 1;
#[cfg(test)]
const TYPE_INT32: u8 = 2;
#[cfg(test)]
const TYPE_INT16: u8 = 3;
#[cfg(test)]
const TYPE_INT8: u8 = 4;
const TYPE_UINT64: u8 = 5;
#[cfg(test)]
const TYPE_UINT32: u8 = 6;
#[cfg(test)]
const TYPE_UINT16: u8 = 7;
const TYPE_UINT8: u8 = 8;
const TYPE_DOUBLE: u8 = 9;
const TYPE_STRING: u8 = 10;
const TYPE_BOOL: u8 = 11;
const TYPE_OBJECT: u8 = 12;

/// Array flag (OR'd with element type).
const FLAG_ARRAY: u8 = 0x80;

/// Nesting limit when decoding untrusted input.
#[cfg(test)]
const MAX_DEPTH: usize = 64;

fn err(msg: impl Into<String>) -> RpcError {
    RpcError::PortableStorage(msg.into())
}

// =============================================================================
// Encoding
// =============================================================================

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_varint_count(&mut self, n: usize) {
        if n < 64 {
            self.write_u8((n << 2) as u8);
        } else if n < 16384 {
            self.buf.extend_from_slice(&((n << 2 | 1) as u16).to_le_bytes());
        } else if n < 1_073_741_824 {
            self.write_u32_le((n << 2 | 2) as u32);
        } else {
            self.buf.extend_from_slice(&((n << 2 | 3) as u64).to_le_bytes());
        }
    }

    fn write_string(&mut self, s: &[u8]) {
        self.write_varint_count(s.len());
        self.buf.extend_from_slice(s);
    }

    fn write_section(&mut self, map: &Map<String, Value>) -> Result<(), RpcError> {
        let entries: Vec<_> = map.iter().filter(|(_, v)| !v.is_null()).collect();
        self.write_varint_count(entries.len());
        for (key, val) in entries {
            let name = key.as_bytes();
            if name.len() > u8::MAX as usize {
                return Err(err(format!("section name too long: {}", key)));
            }
            self.write_u8(name.len() as u8);
            self.buf.extend_from_slice(name);
            self.write_entry(val)?;
        }
        Ok(())
    }

    fn write_entry(&mut self, val: &Value) -> Result<(), RpcError> {
        match val {
            Value::Array(items) => {
                let elem_type = match items.first() {
                    Some(first) => type_of(first)?,
                    None => TYPE_UINT8,
                };
                if items.iter().skip(1).any(|v| type_of(v).ok() != Some(elem_type)) {
                    return Err(err("arrays must be homogeneous"));
                }
                self.write_u8(FLAG_ARRAY | elem_type);
                self.write_varint_count(items.len());
                for item in items {
                    self.write_value_only(item)?;
                }
                Ok(())
            }
            other => {
                self.write_u8(type_of(other)?);
                self.write_value_only(other)
            }
        }
    }

    /// Write just the value bytes (no type tag).
    fn write_value_only(&mut self, val: &Value) -> Result<(), RpcError> {
        match val {
            Value::Bool(b) => self.write_u8(u8::from(*b)),
            Value::String(s) => self.write_string(s.as_bytes()),
            Value::Object(m) => self.write_section(m)?,
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    self.buf.extend_from_slice(&u.to_le_bytes());
                } else if let Some(i) = n.as_i64() {
                    self.buf.extend_from_slice(&i.to_le_bytes());
                } else if let Some(f) = n.as_f64() {
                    self.buf.extend_from_slice(&f.to_bits().to_le_bytes());
                }
            }
            Value::Array(_) => return Err(err("nested arrays are not supported")),
            Value::Null => return Err(err("null values are not supported")),
        }
        Ok(())
    }
}

fn type_of(val: &Value) -> Result<u8, RpcError> {
    Ok(match val {
        Value::Bool(_) => TYPE_BOOL,
        Value::String(_) => TYPE_STRING,
        Value::Object(_) => TYPE_OBJECT,
        Value::Number(n) if n.is_u64() => TYPE_UINT64,
        Value::Number(n) if n.is_i64() => TYPE_INT64,
        Value::Number(_) => TYPE_DOUBLE,
        Value::Array(_) => return Err(err("nested arrays are not supported")),
        Value::Null => return Err(err("null values are not supported")),
    })
}

/// Encode a JSON object as a portable storage blob.
///
/// Null fields are omitted. Unsigned numbers map to uint64, negative ones to
/// int64 and fractional ones to double.
pub fn encode_json(root: &Value) -> Result<Vec<u8>, RpcError> {
    let map = root
        .as_object()
        .ok_or_else(|| err("root value must be an object"))?;
    let mut w = Writer::new();
    w.write_u32_le(SIGNATURE_A);
    w.write_u32_le(SIGNATURE_B);
    w.write_u8(FORMAT_VER);
    w.write_section(map)?;
    Ok(w.buf)
}

// =============================================================================
// Decoding
// =============================================================================

#[cfg(test)]
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

#[cfg(test)]
impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RpcError> {
        if self.data.len() - self.pos < n {
            return Err(err(format!("unexpected end of data at offset {}", self.pos)));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], RpcError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, RpcError> {
        Ok(self.take(1)?[0])
    }

    fn read_varint_count(&mut self) -> Result<usize, RpcError> {
        let first = self.read_u8()?;
        let size_mark = first & 0x03;
        let mut bytes = [0u8; 8];
        bytes[0] = first;
        let width = match size_mark {
            0 => 1,
            1 => 2,
            2 => 4,
            _ => 8,
        };
        bytes[1..width].copy_from_slice(self.take(width - 1)?);
        let raw = u64::from_le_bytes(bytes) >> 2;
        usize::try_from(raw).map_err(|_| err("count overflows usize"))
    }

    fn read_string(&mut self) -> Result<String, RpcError> {
        let len = self.read_varint_count()?;
        let bytes = self.take(len)?;
        // Binary blobs are surfaced as lossy text; callers that need raw
        // bytes should read the response themselves.
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_value(&mut self, type_tag: u8, depth: usize) -> Result<Value, RpcError> {
        Ok(match type_tag {
            TYPE_INT64 => Value::from(i64::from_le_bytes(self.read_array()?)),
            TYPE_INT32 => Value::from(i32::from_le_bytes(self.read_array()?)),
            TYPE_INT16 => Value::from(i16::from_le_bytes(self.read_array()?)),
            TYPE_INT8 => Value::from(self.read_u8()? as i8),
            TYPE_UINT64 => Value::from(u64::from_le_bytes(self.read_array()?)),
            TYPE_UINT32 => Value::from(u32::from_le_bytes(self.read_array()?)),
            TYPE_UINT16 => Value::from(u16::from_le_bytes(self.read_array()?)),
            TYPE_UINT8 => Value::from(self.read_u8()?),
            TYPE_DOUBLE => {
                let f = f64::from_bits(u64::from_le_bytes(self.read_array()?));
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
            }
            TYPE_STRING => Value::String(self.read_string()?),
            TYPE_BOOL => Value::Bool(self.read_u8()? != 0),
            TYPE_OBJECT => Value::Object(self.read_section(depth + 1)?),
            other => return Err(err(format!("unknown type tag {}", other))),
        })
    }

    fn read_entry(&mut self, depth: usize) -> Result<Value, RpcError> {
        let tag = self.read_u8()?;
        if tag & FLAG_ARRAY != 0 {
            let count = self.read_varint_count()?;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(self.read_value(tag & !FLAG_ARRAY, depth)?);
            }
            Ok(Value::Array(items))
        } else {
            self.read_value(tag, depth)
        }
    }

    fn read_section(&mut self, depth: usize) -> Result<Map<String, Value>, RpcError> {
        if depth > MAX_DEPTH {
            return Err(err("nesting too deep"));
        }
        let count = self.read_varint_count()?;
        let mut map = Map::new();
        for _ in 0..count {
            let name_len = self.read_u8()? as usize;
            let name = String::from_utf8_lossy(self.take(name_len)?).into_owned();
            let value = self.read_entry(depth)?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Decode a portable storage blob into a JSON object. Used to check the
/// encoder's output.
#[cfg(test)]
fn decode_to_json(data: &[u8]) -> Result<Value, RpcError> {
    let mut reader = Reader::new(data);
    let sig_a = u32::from_le_bytes(reader.read_array()?);
    let sig_b = u32::from_le_bytes(reader.read_array()?);
    if sig_a != SIGNATURE_A || sig_b != SIGNATURE_B {
        return Err(err("bad signature"));
    }
    let ver = reader.read_u8()?;
    if ver != FORMAT_VER {
        return Err(err(format!("unsupported format version {}", ver)));
    }
    reader.read_section(0).map(Value::Object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_layout() {
        let bytes = encode_json(&json!({})).unwrap();
        assert_eq!(&bytes[..4], &SIGNATURE_A.to_le_bytes());
        assert_eq!(&bytes[4..8], &SIGNATURE_B.to_le_bytes());
        assert_eq!(bytes[8], FORMAT_VER);
        assert_eq!(bytes[9], 0); // empty section, count 0
        assert_eq!(bytes.len(), 10);
    }

    #[test]
    fn test_mixed_section() {
        let params = json!({
            "start_height": 12345u64,
            "prune": true,
            "client": "wallet",
            "offset": -3,
            "heights": [1u64, 2u64, 3u64],
            "nested": { "x": 42u64 },
            "skipped": null,
        });
        let decoded = decode_to_json(&encode_json(&params).unwrap()).unwrap();
        assert_eq!(decoded["start_height"], 12345);
        assert_eq!(decoded["prune"], true);
        assert_eq!(decoded["client"], "wallet");
        assert_eq!(decoded["offset"], -3);
        assert_eq!(decoded["heights"], json!([1, 2, 3]));
        assert_eq!(decoded["nested"]["x"], 42);
        assert!(decoded.get("skipped").is_none());
    }

    #[test]
    fn test_rejects_unsupported_shapes() {
        assert!(encode_json(&json!([1, 2])).is_err());
        assert!(encode_json(&json!({ "a": [1, "x"] })).is_err());
        assert!(encode_json(&json!({ "a": [[1]] })).is_err());
    }

    #[test]
    fn test_signature_validation() {
        assert!(decode_to_json(&[0u8; 20]).is_err());
        assert!(decode_to_json(&[1u8, 2]).is_err());
    }

    #[test]
    fn test_varint_count_sizes() {
        for &count in &[0usize, 1, 63, 64, 100, 16383, 16384, 100_000] {
            let mut w = Writer::new();
            w.write_varint_count(count);
            let mut r = Reader::new(&w.buf);
            assert_eq!(r.read_varint_count().unwrap(), count, "varint roundtrip failed for {}", count);
        }
    }
}
