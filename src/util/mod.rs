//! Shared helpers that are not protocol types themselves.

mod b64;

pub use b64::Base64Bytes;
