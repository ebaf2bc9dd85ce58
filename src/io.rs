//! Manual binary serialization traits, following the teacher crate's
//! `Encodeable`/`Decodeable` pattern instead of pulling in `serde`.

use std::convert::TryInto;
use std::mem::size_of;

use bit_vec::BitVec;

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self;
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|e| panic!("io error reading {} bytes: {}", bytes_count, e));
    buffer
}

pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

/// Accumulates a sequence of `Encodeable` values into one contiguous
/// buffer, optionally zero-padded out to a fixed page-sized slot.
#[derive(Default)]
pub struct SmallWriter {
    buf: Vec<u8>,
}

impl SmallWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) -> &mut Self {
        self.buf.extend_from_slice(&obj.encode());
        self
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();
        assert!(
            buf.len() <= size,
            "encoded size {} exceeds target size {}",
            buf.len(),
            size
        );
        buf.resize(size, 0);
        buf
    }
}

/// # Format
/// - 4 bytes: bit count (`u32`)
/// - n bytes: packed bit vector (`BitVec::to_bytes`)
impl Encodeable for BitVec {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&(self.len() as u32));
        w.write_raw(&self.to_bytes());
        w.to_bytes()
    }
}

impl Decodeable for BitVec {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let bit_count = u32::decode_from(reader) as usize;
        let byte_count = (bit_count + 7) / 8;
        let raw = read_exact(reader, byte_count);
        let mut bits = BitVec::from_bytes(&raw);
        bits.truncate(bit_count);
        bits
    }
}

/// # Format
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        u8::decode_from(reader) == 1
    }
}

/// # Format
/// - 4 bytes: length
/// - n bytes: utf-8 payload
impl Encodeable for String {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&(self.len() as u32));
        w.write_raw(self.as_bytes());
        w.to_bytes()
    }
}

impl Decodeable for String {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let len = u32::decode_from(reader) as usize;
        let bytes = read_exact(reader, len);
        String::from_utf8(bytes).unwrap_or_default()
    }
}

/// # Format
/// - 4 bytes: length
/// - n bytes: payload
impl Encodeable for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&(self.len() as u32));
        w.write_raw(self);
        w.to_bytes()
    }
}

impl Decodeable for Vec<u8> {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let len = u32::decode_from(reader) as usize;
        read_exact(reader, len)
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, isize, usize, f32, f64);
