//! Fixed-width, order-preserving byte-sequence keys for the B+-tree,
//! compared through a supplied comparator (spec §3: "B+-tree node").

use std::cmp::Ordering;
use std::convert::TryInto;

use crate::error::Result;
use crate::storage::column::DataType;
use crate::storage::row::Row;
use crate::storage::schema::Schema;

#[derive(Clone, Copy)]
enum SegmentKind {
    Int32,
    Float32,
    Bytes,
}

#[derive(Clone, Copy)]
struct KeySegment {
    offset: usize,
    width: usize,
    kind: SegmentKind,
}

/// Composite key comparator built from an ordered list of column
/// indexes; compares segment by segment so that numeric columns keep
/// numeric ordering even inside a multi-column key.
#[derive(Clone)]
pub struct KeyComparator {
    segments: Vec<KeySegment>,
}

impl KeyComparator {
    pub fn for_columns(schema: &Schema, column_indexes: &[usize]) -> Result<Self> {
        let mut segments = Vec::with_capacity(column_indexes.len());
        let mut offset = 0;
        for &idx in column_indexes {
            let column = schema.column(idx)?;
            let width = column.data_type.fixed_width(column.length);
            let kind = match column.data_type {
                DataType::Int32 => SegmentKind::Int32,
                DataType::Float32 => SegmentKind::Float32,
                DataType::FixedChar => SegmentKind::Bytes,
            };
            segments.push(KeySegment { offset, width, kind });
            offset += width;
        }
        Ok(Self { segments })
    }

    pub fn key_size(&self) -> usize {
        self.segments.iter().map(|s| s.width).sum()
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        for seg in &self.segments {
            let sa = &a[seg.offset..seg.offset + seg.width];
            let sb = &b[seg.offset..seg.offset + seg.width];
            let ord = match seg.kind {
                SegmentKind::Int32 => {
                    i32::from_le_bytes(sa.try_into().unwrap()).cmp(&i32::from_le_bytes(sb.try_into().unwrap()))
                }
                SegmentKind::Float32 => f32::from_le_bytes(sa.try_into().unwrap())
                    .partial_cmp(&f32::from_le_bytes(sb.try_into().unwrap()))
                    .unwrap_or(Ordering::Equal),
                SegmentKind::Bytes => sa.cmp(sb),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub fn key_of(&self, row: &Row, column_indexes: &[usize], schema: &Schema) -> Result<Vec<u8>> {
        row.key_bytes(column_indexes, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::column::Column;

    #[test]
    fn numeric_columns_compare_numerically_not_lexicographically() {
        let schema = Schema::new(vec![Column::new("age", DataType::Int32, 0, 0)]);
        let cmp = KeyComparator::for_columns(&schema, &[0]).unwrap();

        let small = 5i32.to_le_bytes().to_vec();
        let big = 300i32.to_le_bytes().to_vec();
        assert_eq!(cmp.compare(&small, &big), Ordering::Less);
    }
}
