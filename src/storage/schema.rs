//! Ordered column list persisted with a magic-number header so catalog
//! reads can detect corruption (spec §6: "Schema serialization").

use std::io::Read;

use crate::config::SCHEMA_MAGIC;
use crate::error::{Error, Result};
use crate::io::{Decodeable, Encodeable, SmallWriter};
use crate::storage::column::Column;

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Result<&Column> {
        self.columns.get(index).ok_or(Error::ColumnNameNotExist)
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or(Error::ColumnNameNotExist)
    }

    /// Total byte width of a fixed-width composite key built from
    /// `column_indexes`, in the order given.
    pub fn key_size(&self, column_indexes: &[usize]) -> Result<usize> {
        let mut total = 0;
        for &idx in column_indexes {
            let column = self.column(idx)?;
            total += column.data_type.fixed_width(column.length);
        }
        Ok(total)
    }
}

/// # Format
/// `magic | column_count | columns[*]`
impl Encodeable for Schema {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&SCHEMA_MAGIC);
        w.write(&(self.columns.len() as u32));
        for column in &self.columns {
            w.write(column);
        }
        w.to_bytes()
    }
}

impl Schema {
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = u32::decode_from(reader);
        if magic != SCHEMA_MAGIC {
            return Err(Error::PageCorrupted);
        }
        let column_count = u32::decode_from(reader) as usize;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            columns.push(Column::decode_from(reader)?);
        }
        Ok(Self { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::column::DataType;

    #[test]
    fn roundtrips_through_bytes() {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Int32, 0, 0).not_null().with_unique(),
            Column::new("name", DataType::FixedChar, 64, 1),
        ]);

        let bytes = schema.encode();
        let decoded = Schema::decode_from(&mut std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.column_count(), 2);
        assert_eq!(decoded.column(0).unwrap().name, "id");
        assert_eq!(decoded.index_of("name").unwrap(), 1);
    }
}
