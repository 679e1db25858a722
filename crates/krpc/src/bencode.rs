//! Bencode values and a strict decoder.
//!
//! Dictionaries are kept in a `BTreeMap` so encoding always emits keys in
//! sorted byte order, as the format requires.

use std::collections::BTreeMap;

use bytes::BufMut;
use grapefruit_models::GrapefruitError;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn dict() -> DictBuilder {
        DictBuilder(BTreeMap::new())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Dictionary lookup; `None` for missing keys and non-dictionaries.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?.get(key.as_bytes())
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get(key)?.as_bytes()
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_int()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(self, &mut out);
        out
    }
}

/// Small helper for building dictionaries inline.
pub struct DictBuilder(BTreeMap<Vec<u8>, Value>);

impl DictBuilder {
    pub fn insert(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.as_bytes().to_vec(), value);
        self
    }

    pub fn insert_opt(self, key: &str, value: Option<Value>) -> Self {
        match value {
            Some(v) => self.insert(key, v),
            None => self,
        }
    }

    pub fn build(self) -> Value {
        Value::Dict(self.0)
    }
}

pub fn encode_into<B: BufMut>(value: &Value, buf: &mut B) {
    match value {
        Value::Int(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Value::Bytes(b) => encode_bytes(b, buf),
        Value::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dict(map) => {
            buf.put_u8(b'd');
            for (k, v) in map {
                encode_bytes(k, buf);
                encode_into(v, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn encode_bytes<B: BufMut>(b: &[u8], buf: &mut B) {
    buf.put_slice(b.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(b);
}

/// Decodes exactly one value; trailing bytes are an error.
pub fn decode(input: &[u8]) -> Result<Value, GrapefruitError> {
    let (value, used) = decode_prefix(input)?;
    if used != input.len() {
        return Err(err(used, "trailing data after value"));
    }
    Ok(value)
}

/// Decodes one value from the start of `input` and returns it with the number of bytes consumed.
pub fn decode_prefix(input: &[u8]) -> Result<(Value, usize), GrapefruitError> {
    let mut decoder = Decoder { buf: input, pos: 0 };
    let value = decoder.value(0)?;
    Ok((value, decoder.pos))
}

fn err(offset: usize, reason: &str) -> GrapefruitError {
    GrapefruitError::Bencode { offset, reason: reason.to_string() }
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, GrapefruitError> {
        self.buf.get(self.pos).copied().ok_or_else(|| err(self.pos, "unexpected end of input"))
    }

    /// `depth` counts the containers around the value being read.
    fn value(&mut self, depth: usize) -> Result<Value, GrapefruitError> {
        match self.peek()? {
            b'l' | b'd' if depth >= MAX_DEPTH => Err(err(self.pos, "nesting too deep")),
            b'i' => {
                self.pos += 1;
                let n = self.int_until(b'e')?;
                Ok(Value::Int(n))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut map = BTreeMap::new();
                while self.peek()? != b'e' {
                    if !self.peek()?.is_ascii_digit() {
                        return Err(err(self.pos, "dictionary key must be a byte string"));
                    }
                    let key = self.byte_string()?;
                    let value = self.value(depth + 1)?;
                    map.insert(key, value);
                }
                self.pos += 1;
                Ok(Value::Dict(map))
            }
            b'0'..=b'9' => Ok(Value::Bytes(self.byte_string()?)),
            _ => Err(err(self.pos, "unexpected byte")),
        }
    }

    fn byte_string(&mut self) -> Result<Vec<u8>, GrapefruitError> {
        let start = self.pos;
        let len = self.int_until(b':')?;
        if len < 0 {
            return Err(err(start, "negative string length"));
        }
        let len = len as usize;
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let out = self.buf[self.pos..end].to_vec();
                self.pos = end;
                Ok(out)
            }
            None => Err(err(start, "string length exceeds input")),
        }
    }

    fn int_until(&mut self, terminator: u8) -> Result<i64, GrapefruitError> {
        let start = self.pos;
        let rel_end = self.buf[start..]
            .iter()
            .position(|b| *b == terminator)
            .ok_or_else(|| err(start, "unterminated integer"))?;
        let digits = &self.buf[start..start + rel_end];

        let (negative, body) = match digits.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, digits),
        };
        if body.is_empty() || !body.iter().all(u8::is_ascii_digit) {
            return Err(err(start, "invalid integer"));
        }
        if body.len() > 1 && body[0] == b'0' {
            return Err(err(start, "leading zero in integer"));
        }
        if negative && body == b"0" {
            return Err(err(start, "negative zero"));
        }

        // Only ASCII digits and an optional sign remain, so this is valid UTF-8.
        let text = std::str::from_utf8(digits).map_err(|_| err(start, "invalid integer"))?;
        let n = text.parse::<i64>().map_err(|_| err(start, "integer out of range"))?;
        self.pos = start + rel_end + 1;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode(b"i42e").unwrap(), Value::Int(42));
        assert_eq!(decode(b"i-7e").unwrap(), Value::Int(-7));
        assert_eq!(decode(b"4:spam").unwrap(), Value::bytes("spam"));
        assert_eq!(decode(b"0:").unwrap(), Value::bytes(""));
    }

    #[test]
    fn test_decode_nested() {
        let v = decode(b"d3:bar4:spam3:fooi42e4:listl1:ai1eee").unwrap();
        assert_eq!(v.get_bytes("bar"), Some(&b"spam"[..]));
        assert_eq!(v.get_int("foo"), Some(42));
        assert_eq!(v.get("list").and_then(Value::as_list).map(|l| l.len()), Some(2));
    }

    #[test]
    fn test_encode_sorts_keys() {
        let v = Value::dict()
            .insert("zeta", Value::Int(1))
            .insert("alpha", Value::bytes("x"))
            .build();
        assert_eq!(v.to_bytes(), b"d5:alpha1:x4:zetai1ee".to_vec());
    }

    #[test]
    fn test_rejects_malformed_input() {
        for bad in [
            &b"i03e"[..],
            b"i-0e",
            b"ie",
            b"i12",
            b"5:abc",
            b"l1:a",
            b"d1:a",
            b"di1ei2ee",
            b"x",
            b"",
            b"i1ei2e",
        ] {
            assert!(decode(bad).is_err(), "expected error for {:?}", String::from_utf8_lossy(bad));
        }
    }

    #[test]
    fn test_nesting_limit_is_64_containers() {
        let nested = |levels: usize, inner: &[u8]| {
            let mut input = vec![b'l'; levels];
            input.extend_from_slice(inner);
            input.extend(vec![b'e'; levels]);
            input
        };
        assert!(decode(&nested(MAX_DEPTH, b"i7e")).is_ok());
        assert!(decode(&nested(MAX_DEPTH, b"")).is_ok());
        assert!(decode(&nested(MAX_DEPTH + 1, b"")).is_err());
        assert!(decode(&nested(MAX_DEPTH - 1, b"de")).is_ok());
        assert!(decode(&nested(MAX_DEPTH, b"de")).is_err());
    }

    #[test]
    fn test_decode_prefix_reports_consumed() {
        let mut input = b"d8:msg_typei1e5:piecei0ee".to_vec();
        input.extend_from_slice(b"RAWPIECE");
        let (v, used) = decode_prefix(&input).unwrap();
        assert_eq!(v.get_int("msg_type"), Some(1));
        assert_eq!(&input[used..], b"RAWPIECE");
    }
}
