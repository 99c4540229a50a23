//! SQLite transport for relgraph.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! [`SqliteConnection`] implements [`relgraph_core::Transport`] over the
//! bundled libsqlite3: queries return every row at once, inserts report
//! `last_insert_rowid`, and the three transaction calls map to `BEGIN`,
//! `COMMIT` and `ROLLBACK`.
//!
//! # Example
//!
//! ```rust,ignore
//! use relgraph_core::Transport;
//! use relgraph_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE team (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let id = conn.insert("INSERT INTO team (name) VALUES (?)", &["Avengers".into()])?;
//! ```

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}
