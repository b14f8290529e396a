pub mod date;
pub mod error;

// Re-export core types at crate root for convenience
pub use bstr::{BStr, BString, ByteSlice, ByteVec};
pub use error::UtilError;

pub type Result<T> = std::result::Result<T, UtilError>;
