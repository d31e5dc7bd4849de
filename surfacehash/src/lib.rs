//! Computes a stable 64-bit hash of a compiled .NET assembly's public API
//! surface, for use as a build-cache key: two assemblies with the same hash
//! are interchangeable from a consumer's point of view, while any observable
//! change to the public surface changes the hash.
//!
//! ```no_run
//! use surfacehash::{compute_surface_hash, HashOptions};
//!
//! let bytes = std::fs::read("MyLibrary.dll")?;
//! let hash = compute_surface_hash(&bytes, HashOptions::default())?;
//! println!("{hash:016x}");
//! # Ok::<(), surfacehash::Error>(())
//! ```

pub mod error;
pub mod hash;
pub mod metadata;
pub mod pe;
mod utilities;

pub use error::Error;
pub use hash::{HashOptions, SurfaceHasher};

use metadata::assembly::Assembly;
use pe::PEFile;

/// Parses `bytes` as a PE/COFF .NET assembly and computes its surface hash.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn compute_surface_hash(bytes: &[u8], options: HashOptions) -> Result<u64, Error> {
	let pe = PEFile::try_from(bytes)?;
	let assembly = Assembly::try_from(pe)?;
	let mut hasher = SurfaceHasher::new(&assembly, options)?;
	Ok(hasher.compute()?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_non_pe_input() {
		let result = compute_surface_hash(b"not a pe file", HashOptions::default());
		assert!(result.is_err());
	}
}
