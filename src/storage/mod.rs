pub mod column;
pub mod row;
pub mod schema;
pub mod table_heap;
pub mod table_page;

pub use column::{Column, DataType};
pub use row::{Field, Row, RowId};
pub use schema::Schema;
pub use table_heap::{TableHeap, TableHeapIterator};
