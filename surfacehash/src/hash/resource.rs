//! Manifest-resource digesting (§4.7 step 6).
//!
//! Resource bodies can run to megabytes; rather than folding every byte
//! through the FNV mixer directly (which would make resource-heavy
//! assemblies dominate hashing time) the body is first collapsed to an
//! MD5 digest, and only the digest's 16 bytes are folded into the running
//! `u64`. MD5 is used purely as a fixed-size scrambler here, not for any
//! cryptographic property.

use md5::{Digest, Md5};

use crate::hash::primitive::from_bytes;

/// Digests a resource body and folds the digest bytes into a single `u64`.
pub fn hash_resource_body(bytes: &[u8]) -> u64 {
	let mut hasher = Md5::new();
	hasher.update(bytes);
	let digest = hasher.finalize();
	from_bytes(digest.as_slice())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identical_bodies_hash_identically() {
		assert_eq!(hash_resource_body(b"payload"), hash_resource_body(b"payload"));
	}

	#[test]
	fn differing_bodies_hash_differently() {
		assert_ne!(hash_resource_body(b"payload-a"), hash_resource_body(b"payload-b"));
	}

	#[test]
	fn empty_body_is_stable() {
		let a = hash_resource_body(&[]);
		let b = hash_resource_body(&[]);
		assert_eq!(a, b);
	}
}
