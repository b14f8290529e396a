//! Delta stream application.
//!
//! Git packfiles store many objects as a delta against a base object: a
//! short instruction stream of COPY (from the base) and INSERT (literal)
//! opcodes that, replayed in order, reconstructs the target payload.
//!
//! ```text
//! [base_size: size-encoded] [result_size: size-encoded]
//! [instruction]*
//! ```
//!
//! Instructions:
//! - Copy:   `[1SSSOOOO] [offset_bytes] [size_bytes]`
//! - Insert: `[0NNNNNNN] [N literal bytes]`

pub mod apply;
