//! A single-table database stored as a B-tree of fixed-size pages.
//!
//! Rows are `(id, username, email)` with the id as key. The file is a flat
//! run of 4096-byte pages with the root always at page 0.

pub mod btree;
pub mod constants;
pub mod pager;
pub mod repl;
pub mod row;
pub mod table;
pub mod virtual_machine;

pub use row::{Row, RowError};
pub use table::{Cursor, Table, TableConfig, TableError};
