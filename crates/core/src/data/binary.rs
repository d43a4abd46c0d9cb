//! Binary form of [`Data`]
//!
//! # Binary Format
//! ```text
//! magic "PSDT" (4 bytes) | version (1 byte) | data body
//!
//! data body:  entry_count (u32) | entry* | has_metadata (u8) | [data body]
//! entry:      key_len (u32) | key (utf-8) | value
//! value:      type_tag (u8) | payload
//! ```
//!
//! Payloads by type (all integers and floats little-endian):
//! ```text
//! NDARRAY       element_tag (u8) | rank (u32) | dims (i64 * rank) | len (u64) | buffer
//! STRING        len (u32) | utf-8
//! BYTES         len (u64) | bytes
//! IMAGE         format_tag (u8) | width (u32) | height (u32) | len (u64) | bytes
//! BOUNDING_BOX  x1 x2 y1 y2 (f64 * 4) | label (opt str) | probability (opt f64)
//! POINT         n (u32) | coords (f64 * n) | label (opt str) | probability (opt f64)
//! INT64         i64
//! DOUBLE        f64
//! BOOLEAN       u8 (0 or 1)
//! DATA          data body
//! LIST          element_type_tag (u8) | count (u32) | untagged payload * count
//! ```
//!
//! `opt` fields are a presence byte followed by the value when present.

use super::{BoundingBox, Data, Image, ImageFormat, List, Point, Value, ValueType};
use crate::tensor::{ElementType, NDArray, SerializedNDArray};
use crate::{Error, Result};

/// Leading magic bytes
pub const MAGIC: &[u8; 4] = b"PSDT";

/// Current format version
pub const VERSION: u8 = 1;

/// Upper bound on speculative preallocation from untrusted length prefixes
const MAX_PREALLOC: usize = 4096;

/// Deepest nesting of metadata, DATA and LIST values accepted when decoding
pub const MAX_DEPTH: usize = 128;

impl Data {
    /// Encode to the binary wire form
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        write_data(&mut out, self)?;
        Ok(out)
    }

    /// Decode the binary wire form; trailing bytes are an error
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        if reader.take(MAGIC.len())? != MAGIC {
            return Err(Error::Serialization("missing PSDT magic".to_string()));
        }
        let version = reader.u8()?;
        if version != VERSION {
            return Err(Error::Serialization(format!(
                "unsupported Data format version {}",
                version
            )));
        }
        let data = read_data(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(Error::Serialization(format!(
                "{} trailing bytes after Data",
                reader.remaining()
            )));
        }
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn write_len_u32(out: &mut Vec<u8>, len: usize, what: &str) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Serialization(format!("{} too long: {}", what, len)))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    write_len_u32(out, s.len(), "string")?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn write_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_annotations(out: &mut Vec<u8>, label: Option<&str>, probability: Option<f64>) -> Result<()> {
    match label {
        Some(label) => {
            out.push(1);
            write_str(out, label)?;
        }
        None => out.push(0),
    }
    match probability {
        Some(p) => {
            out.push(1);
            write_f64(out, p);
        }
        None => out.push(0),
    }
    Ok(())
}

fn write_data(out: &mut Vec<u8>, data: &Data) -> Result<()> {
    write_len_u32(out, data.len(), "Data")?;
    for (key, value) in data.iter() {
        write_str(out, key)?;
        out.push(value.value_type().tag());
        write_payload(out, value)?;
    }
    match data.metadata() {
        Some(meta) => {
            out.push(1);
            write_data(out, meta)
        }
        None => {
            out.push(0);
            Ok(())
        }
    }
}

fn write_payload(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::NDArray(nd) => write_ndarray(out, nd)?,
        Value::String(s) => write_str(out, s)?,
        Value::Bytes(b) => write_blob(out, b),
        Value::Image(img) => {
            out.push(img.format().tag());
            out.extend_from_slice(&img.width().to_le_bytes());
            out.extend_from_slice(&img.height().to_le_bytes());
            write_blob(out, img.data());
        }
        Value::BoundingBox(bb) => {
            for v in [bb.x1(), bb.x2(), bb.y1(), bb.y2()] {
                write_f64(out, v);
            }
            write_annotations(out, bb.label(), bb.probability())?;
        }
        Value::Point(p) => {
            write_len_u32(out, p.dimensions(), "Point")?;
            for c in p.coords() {
                write_f64(out, *c);
            }
            write_annotations(out, p.label(), p.probability())?;
        }
        Value::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Double(d) => write_f64(out, *d),
        Value::Boolean(b) => out.push(u8::from(*b)),
        Value::Data(d) => write_data(out, d)?,
        Value::List(list) => write_list(out, list)?,
    }
    Ok(())
}

fn write_ndarray(out: &mut Vec<u8>, nd: &NDArray) -> Result<()> {
    let pivot = nd.to_serialized()?;
    out.push(pivot.element_type().tag());
    write_len_u32(out, pivot.shape().len(), "NDArray rank")?;
    for d in pivot.shape() {
        out.extend_from_slice(&d.to_le_bytes());
    }
    write_blob(out, pivot.buffer());
    Ok(())
}

fn write_list(out: &mut Vec<u8>, list: &List) -> Result<()> {
    out.push(list.element_type().tag());
    write_len_u32(out, list.len(), "List")?;
    for item in list.iter() {
        write_payload(out, item)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }

    /// Run `read` one nesting level deeper, failing past [`MAX_DEPTH`]
    fn nested<T>(&mut self, read: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::Serialization(format!(
                "nesting exceeds {} levels at offset {}",
                MAX_DEPTH, self.pos
            )));
        }
        self.depth += 1;
        let out = read(self);
        self.depth -= 1;
        out
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::Serialization(format!(
                "truncated input: need {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn flag(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Serialization(format!("invalid flag byte {}", other))),
        }
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Serialization(format!("invalid utf-8 string: {}", e)))
    }

    fn blob(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.u64()?)
            .map_err(|_| Error::Serialization("blob length overflows usize".to_string()))?;
        Ok(self.take(len)?.to_vec())
    }

    fn annotations(&mut self) -> Result<(Option<String>, Option<f64>)> {
        let label = if self.flag()? { Some(self.string()?) } else { None };
        let probability = if self.flag()? { Some(self.f64()?) } else { None };
        Ok((label, probability))
    }
}

fn capacity(count: usize) -> usize {
    count.min(MAX_PREALLOC)
}

/// Re-tag a validation error as a decode error
fn decode_err(err: Error) -> Error {
    match err {
        Error::InvalidData(msg) => Error::Serialization(msg),
        Error::Tensor(e) => Error::Serialization(e.to_string()),
        other => other,
    }
}

fn read_data(r: &mut Reader<'_>) -> Result<Data> {
    let count = r.u32()? as usize;
    let mut data = Data::new();
    for _ in 0..count {
        let key = r.string()?;
        let value_type = ValueType::from_tag(r.u8()?)?;
        let value = read_payload(r, value_type)?;
        if data.has(&key) {
            return Err(Error::Serialization(format!("duplicate key '{}'", key)));
        }
        data.put(key, value).map_err(decode_err)?;
    }
    if r.flag()? {
        data.set_metadata(r.nested(read_data)?);
    }
    Ok(data)
}

fn read_payload(r: &mut Reader<'_>, value_type: ValueType) -> Result<Value> {
    let value = match value_type {
        ValueType::NDArray => Value::NDArray(read_ndarray(r)?),
        ValueType::String => Value::String(r.string()?),
        ValueType::Bytes => Value::Bytes(r.blob()?),
        ValueType::Image => {
            let format = ImageFormat::from_tag(r.u8()?)?;
            let width = r.u32()?;
            let height = r.u32()?;
            let bytes = r.blob()?;
            Value::Image(Image::new(format, width, height, bytes).map_err(decode_err)?)
        }
        ValueType::BoundingBox => {
            let (x1, x2, y1, y2) = (r.f64()?, r.f64()?, r.f64()?, r.f64()?);
            let mut bb = BoundingBox::from_corners(x1, x2, y1, y2);
            let (label, probability) = r.annotations()?;
            if let Some(label) = label {
                bb = bb.with_label(label);
            }
            if let Some(p) = probability {
                bb = bb.with_probability(p);
            }
            Value::BoundingBox(bb)
        }
        ValueType::Point => {
            let n = r.u32()? as usize;
            let mut coords = Vec::with_capacity(capacity(n));
            for _ in 0..n {
                coords.push(r.f64()?);
            }
            let mut point = Point::from_coords(coords).map_err(decode_err)?;
            let (label, probability) = r.annotations()?;
            if let Some(label) = label {
                point = point.with_label(label);
            }
            if let Some(p) = probability {
                point = point.with_probability(p);
            }
            Value::Point(point)
        }
        ValueType::Int64 => Value::Int64(r.i64()?),
        ValueType::Double => Value::Double(r.f64()?),
        ValueType::Boolean => Value::Boolean(r.flag()?),
        ValueType::Data => Value::Data(r.nested(read_data)?),
        ValueType::List => r.nested(read_list)?,
    };
    Ok(value)
}

fn read_list(r: &mut Reader<'_>) -> Result<Value> {
    let element_type = ValueType::from_tag(r.u8()?)?;
    let count = r.u32()? as usize;
    let mut items = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        items.push(read_payload(r, element_type)?);
    }
    Ok(Value::List(List::new(element_type, items).map_err(decode_err)?))
}

fn read_ndarray(r: &mut Reader<'_>) -> Result<NDArray> {
    let element_type = ElementType::from_tag(r.u8()?).map_err(|e| Error::Serialization(e.to_string()))?;
    let rank = r.u32()? as usize;
    let mut shape = Vec::with_capacity(capacity(rank));
    for _ in 0..rank {
        shape.push(r.i64()?);
    }
    let buffer = r.blob()?;
    let pivot = SerializedNDArray::new(element_type, shape, buffer)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(NDArray::from_serialized(pivot))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Data {
        let mut d = Data::new();
        d.put("s", "hello").unwrap();
        d.put("i", -7i64).unwrap();
        d.put(
            "t",
            NDArray::from_elements(vec![2, 1], &[1i32, 2]).unwrap(),
        )
        .unwrap();
        d.put("bb", BoundingBox::from_corners(0.0, 1.0, 0.0, 1.0).with_label("cat"))
            .unwrap();
        d
    }

    #[test]
    fn test_header() {
        let bytes = sample().as_bytes().unwrap();
        assert_eq!(&bytes[..4], b"PSDT");
        assert_eq!(bytes[4], VERSION);
    }

    #[test]
    fn test_int64_is_little_endian() {
        let bytes = Data::singleton("k", 1i64).unwrap().as_bytes().unwrap();
        // magic, version, count, key_len, "k", tag, payload, has_metadata
        let payload = &bytes[4 + 1 + 4 + 4 + 1 + 1..][..8];
        assert_eq!(payload, &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_every_truncation_fails() {
        let bytes = sample().as_bytes().unwrap();
        for cut in 0..bytes.len() {
            assert!(
                matches!(Data::from_bytes(&bytes[..cut]), Err(Error::Serialization(_))),
                "truncation at {} decoded",
                cut
            );
        }
    }

    #[test]
    fn test_trailing_bytes_fail() {
        let mut bytes = sample().as_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(Data::from_bytes(&bytes), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_bad_tag_and_version() {
        let mut bytes = Data::singleton("k", true).unwrap().as_bytes().unwrap();
        bytes[4] = 9;
        assert!(Data::from_bytes(&bytes).is_err());

        let mut bytes = Data::singleton("k", true).unwrap().as_bytes().unwrap();
        bytes[4 + 1 + 4 + 4 + 1] = 0xEE;
        assert!(matches!(Data::from_bytes(&bytes), Err(Error::Serialization(_))));
    }

    fn header() -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.push(VERSION);
        bytes
    }

    #[test]
    fn test_deep_metadata_chain_fails() {
        // empty Data whose metadata flag is always set
        let mut bytes = header();
        for _ in 0..200_000 {
            bytes.extend_from_slice(&[0, 0, 0, 0, 1]);
        }
        bytes.extend_from_slice(&[0, 0, 0, 0, 0]);
        assert!(matches!(Data::from_bytes(&bytes), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_deep_list_nesting_fails() {
        let mut bytes = header();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(b'k');
        bytes.push(ValueType::List.tag());
        for _ in 0..MAX_DEPTH + 1 {
            bytes.push(ValueType::List.tag());
            bytes.extend_from_slice(&1u32.to_le_bytes());
        }
        assert!(matches!(Data::from_bytes(&bytes), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_nesting_within_limit_decodes() {
        let mut data = Data::singleton("leaf", 1i64).unwrap();
        for _ in 0..MAX_DEPTH {
            data = Data::singleton("inner", data).unwrap();
        }
        let back = Data::from_bytes(&data.as_bytes().unwrap()).unwrap();
        assert_eq!(back, data);

        let too_deep = Data::singleton("inner", data).unwrap();
        assert!(matches!(
            Data::from_bytes(&too_deep.as_bytes().unwrap()),
            Err(Error::Serialization(_))
        ));
    }
}
