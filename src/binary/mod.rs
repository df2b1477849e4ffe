//! Binary database format.
//!
//! All multi-byte integers are little-endian.
//!
//! # File Structure
//!
//! ```text
//! +----------------------+
//! |  RECORD COUNT (u32)  |  4 bytes
//! +----------------------+
//! |   PREFIX TABLE       |  256 x (start: u32, end: u32), indexed by first octet
//! +----------------------+
//! |   RANGE TABLE        |  count x (end_ip: u32, offset: u32, len: u8)
//! +----------------------+
//! |   STRING POOL        |  pipe-delimited record strings
//! +----------------------+
//! ```
//!
//! Prefix entries are indices into the range table, not addresses. Range
//! offsets are absolute positions in the file.

mod format;
mod reader;
pub mod writer;


pub use format::*;
pub use reader::{decode, decode_file, decode_with};
pub use writer::{zip_single, DatabaseWriter};
