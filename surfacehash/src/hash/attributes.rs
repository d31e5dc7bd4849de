//! Custom-attribute blob hashing (§II.23.3, CustomAttrib).
//!
//! A custom attribute's value blob encodes any type it references —
//! including a `typeof(T)` fixed or named argument — as a *string*, not a
//! metadata handle. The constructor usage (method handle, already hashed
//! through the signature/member machinery) and the owner type are captured
//! separately by the caller, so the remaining payload can be folded as raw
//! bytes rather than walked argument-by-argument against the constructor's
//! parameter types: two blobs that decode to different values always differ
//! byte-for-byte, so hashing the bytes is equivalent to hashing the decoded
//! fixed/named arguments for our purposes. The one blind spot this leaves —
//! a `typeof(T)` naming a private type has no handle correlation back to
//! that type's own hash — is an accepted, documented limitation, not a bug.

use crate::hash::primitive::{combine2, from_bytes, OFFSET};

const PROLOG: u16 = 0x0001;

/// Folds a decoded `CustomAttribute` row into a single hash: the
/// already-computed constructor usage hash, combined with the attribute's
/// value blob. Validates the `0x0001` prolog when the blob is non-empty;
/// an attribute with no fixed or named arguments may legitimately carry an
/// empty blob.
pub fn hash_custom_attribute(ctor_hash: u64, blob: &[u8]) -> std::io::Result<u64> {
	if blob.is_empty() {
		return Ok(combine2(ctor_hash, OFFSET));
	}
	if blob.len() < 2 || u16::from_le_bytes([blob[0], blob[1]]) != PROLOG {
		return Err(std::io::ErrorKind::InvalidData.into());
	}
	Ok(combine2(ctor_hash, from_bytes(blob)))
}

/// Folds a set of already-hashed custom attributes into one hash. Attribute
/// order on a given owner is a metadata-table layout artifact, not semantic
/// content, so the set is sorted before combining (§4.7.1 "custom
/// attributes" input).
pub fn hash_custom_attribute_set(attrs: impl IntoIterator<Item = u64>) -> u64 {
	crate::hash::primitive::combine_sorted(attrs.into_iter().collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_blob_missing_prolog() {
		let blob = [0x02, 0x00];
		assert!(hash_custom_attribute(1, &blob).is_err());
	}

	#[test]
	fn empty_blob_is_accepted_for_argument_free_ctors() {
		assert!(hash_custom_attribute(1, &[]).is_ok());
	}

	#[test]
	fn differing_payload_bytes_change_the_hash() {
		let a = hash_custom_attribute(1, &[0x01, 0x00, 0x05]).unwrap();
		let b = hash_custom_attribute(1, &[0x01, 0x00, 0x06]).unwrap();
		assert_ne!(a, b);
	}
}
