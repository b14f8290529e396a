//! Hash computation and object identity for a read-only git object database.
//!
//! This crate provides the core `ObjectId` type, hash computation, hex
//! encoding/decoding, and the pack index fan-out table.

mod error;
pub mod hex;
mod oid;
pub mod hasher;
pub mod fanout;

pub use error::HashError;
pub use oid::ObjectId;
