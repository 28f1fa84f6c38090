//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects beyond path arithmetic. They
//! operate on in-memory data and return deterministic outputs suitable for tests.

pub mod marker;
pub mod ordering;
pub mod sampling;
pub mod sandbox;
pub mod types;
pub mod verdict;
