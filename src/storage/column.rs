//! Column definitions and their on-disk encoding (spec §6: "Column
//! serialization").

use std::io::Read;

use crate::config::COLUMN_MAGIC;
use crate::error::{Error, Result};
use crate::io::{read_exact, Decodeable, Encodeable, SmallWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int32,
    Float32,
    FixedChar,
}

impl DataType {
    fn as_i32(self) -> i32 {
        match self {
            DataType::Int32 => 0,
            DataType::Float32 => 1,
            DataType::FixedChar => 2,
        }
    }

    fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(DataType::Int32),
            1 => Ok(DataType::Float32),
            2 => Ok(DataType::FixedChar),
            _ => Err(Error::PageCorrupted),
        }
    }

    /// Fixed byte width of a column of this type, given its declared
    /// `length` (meaningful only for `FixedChar`). Used to size B+-tree
    /// index keys, which must be fixed-width.
    pub fn fixed_width(self, declared_length: u32) -> usize {
        match self {
            DataType::Int32 => 4,
            DataType::Float32 => 4,
            DataType::FixedChar => declared_length as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    /// Declared maximum length in bytes; meaningful only for `FixedChar`.
    pub length: u32,
    pub table_index: u32,
    pub nullable: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: &str, data_type: DataType, length: u32, table_index: u32) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            length,
            table_index,
            nullable: true,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// # Format
/// `magic | name_len | name_bytes | type(i32) | len(u32) | table_index(u32)
/// | nullable(u32) | unique(u32)`
impl Encodeable for Column {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&COLUMN_MAGIC);
        w.write(&(self.name.len() as u32));
        w.write_raw(self.name.as_bytes());
        w.write(&self.data_type.as_i32());
        w.write(&self.length);
        w.write(&self.table_index);
        w.write(&(self.nullable as u32));
        w.write(&(self.unique as u32));
        w.to_bytes()
    }
}

impl Column {
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = u32::decode_from(reader);
        if magic != COLUMN_MAGIC {
            return Err(Error::PageCorrupted);
        }
        let name_len = u32::decode_from(reader) as usize;
        let name = String::from_utf8(read_exact(reader, name_len)).map_err(|_| Error::PageCorrupted)?;
        let data_type = DataType::from_i32(i32::decode_from(reader))?;
        let length = u32::decode_from(reader);
        let table_index = u32::decode_from(reader);
        let nullable = u32::decode_from(reader) != 0;
        let unique = u32::decode_from(reader) != 0;
        Ok(Self {
            name,
            data_type,
            length,
            table_index,
            nullable,
            unique,
        })
    }
}
