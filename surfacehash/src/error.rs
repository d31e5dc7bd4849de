//! The crate's single externally-visible error: §7 collapses every failure
//! mode (bad signature kind, out-of-range element codes, missing CLI/assembly
//! rows, truncated heaps) into one `BadImage` fault. Internally, every reader
//! and decoder already speaks `std::io::Result` (the metadata layer's own
//! idiom); this type exists only at the public boundary in `lib.rs`.

use std::fmt;

#[derive(Debug)]
pub enum Error {
	BadImage(std::io::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::BadImage(e) => write!(f, "malformed .NET image: {e}"),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::BadImage(e) => Some(e),
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(value: std::io::Error) -> Self {
		Error::BadImage(value)
	}
}

impl From<&'static str> for Error {
	fn from(value: &'static str) -> Self {
		Error::BadImage(std::io::Error::new(std::io::ErrorKind::InvalidData, value))
	}
}
