//! Tuple values and their serialization (spec §6: "Row serialization").

use std::io::{Cursor, Read};

use crate::config::PageId;
use crate::error::{Error, Result};
use crate::io::{read_exact, Decodeable, Encodeable, SmallWriter};
use crate::storage::column::DataType;
use crate::storage::schema::Schema;

/// Stable identifier for a row within a table heap: the page it lives on
/// plus its slot number. Stable across in-place updates, not across
/// delete-then-reinsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl RowId {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int32(i32),
    Float32(f32),
    Char(String),
    Null,
}

impl Field {
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// Fixed-width byte encoding used for B+-tree keys: ints/floats in
    /// little-endian, chars padded/truncated to `width` bytes.
    pub fn to_key_bytes(&self, width: usize) -> Vec<u8> {
        match self {
            Field::Int32(v) => v.to_le_bytes().to_vec(),
            Field::Float32(v) => v.to_le_bytes().to_vec(),
            Field::Char(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.resize(width, 0);
                bytes.truncate(width);
                bytes
            }
            Field::Null => vec![0u8; width],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub fields: Vec<Field>,
}

impl Row {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn key_bytes(&self, column_indexes: &[usize], schema: &Schema) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for &idx in column_indexes {
            let column = schema.column(idx)?;
            let field = self.field(idx).ok_or(Error::ColumnNameNotExist)?;
            bytes.extend_from_slice(&field.to_key_bytes(column.data_type.fixed_width(column.length)));
        }
        Ok(bytes)
    }
}

/// # Format
/// `field_count(u32) | null_bitmap(u32) | fields[*]`, where `fields[i]`
/// is present only when bit `i` of the null bitmap is clear.
impl Encodeable for Row {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&(self.fields.len() as u32));

        let mut bitmap: u32 = 0;
        for (i, field) in self.fields.iter().enumerate() {
            if field.is_null() {
                bitmap |= 1 << i;
            }
        }
        w.write(&bitmap);

        for field in &self.fields {
            match field {
                Field::Int32(v) => {
                    w.write(v);
                }
                Field::Float32(v) => {
                    w.write(v);
                }
                Field::Char(s) => {
                    w.write(&(s.len() as u32));
                    w.write_raw(s.as_bytes());
                }
                Field::Null => {}
            }
        }
        w.to_bytes()
    }
}

impl Row {
    pub fn decode(bytes: &[u8], schema: &Schema) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        Self::decode_from(&mut cursor, schema)
    }

    pub fn decode_from<R: Read>(reader: &mut R, schema: &Schema) -> Result<Self> {
        let field_count = u32::decode_from(reader) as usize;
        let bitmap = u32::decode_from(reader);

        let mut fields = Vec::with_capacity(field_count);
        for i in 0..field_count {
            if bitmap & (1 << i) != 0 {
                fields.push(Field::Null);
                continue;
            }

            let column = schema.column(i)?;
            let field = match column.data_type {
                DataType::Int32 => Field::Int32(i32::decode_from(reader)),
                DataType::Float32 => Field::Float32(f32::decode_from(reader)),
                DataType::FixedChar => {
                    let len = u32::decode_from(reader) as usize;
                    let bytes = read_exact(reader, len);
                    Field::Char(String::from_utf8(bytes).map_err(|_| Error::PageCorrupted)?)
                }
            };
            fields.push(field);
        }

        Ok(Row { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::column::Column;

    #[test]
    fn roundtrips_with_nulls() {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Int32, 0, 0).not_null(),
            Column::new("name", DataType::FixedChar, 64, 1),
            Column::new("gpa", DataType::Float32, 0, 2),
        ]);

        let row = Row::new(vec![
            Field::Int32(7),
            Field::Null,
            Field::Float32(3.5),
        ]);

        let bytes = row.encode();
        let decoded = Row::decode(&bytes, &schema).unwrap();
        assert_eq!(decoded, row);
    }
}
