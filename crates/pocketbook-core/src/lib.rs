//! Core contracts for Pocketbook preference storage: the async key/value
//! backend interface, its error taxonomy, and the fixed set of sensitive keys.
//! This crate stays free of crypto so backends can depend on it cheaply.

pub mod sensitive;
pub mod storage;
