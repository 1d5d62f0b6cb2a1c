//! Access layer: rows, values, the primary table contract and the b-tree
//! index built on top of the page store.
//!
//! - **PageBtreeIndex**: secondary index kept as a b-tree of store pages
//! - **Row / SearchRow**: table rows and their index projections
//! - **TableRows**: what an index needs from the table owning the rows
//! - **Value / DataType**: column values and their types

pub mod btree;
pub mod row;
pub mod table;
pub mod value;

pub use btree::PageBtreeIndex;
pub use row::{Row, SearchRow};
pub use table::{MemoryTable, TableId, TableRows};
pub use value::{DataType, Value};
