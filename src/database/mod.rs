//! Persistent post and credential store

pub mod sqlite;

pub use sqlite::*;
