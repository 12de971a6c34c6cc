//! In-memory tabular data

pub mod table;

pub use table::{Column, ColumnData, Table};
