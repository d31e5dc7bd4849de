//! FNV-1a 64-bit folding primitives.
//!
//! Every combine overload is a left-fold starting from its first argument,
//! not from [`OFFSET`] — combines nest (a type hash feeds into a member
//! hash which feeds into a type-definition hash), and restarting from the
//! basis at each level would erase the inner fold's history.

pub const OFFSET: u64 = 0xcbf29ce484222325;
pub const PRIME: u64 = 0x100000001b3;

#[inline]
pub fn mix(h: u64, x: u64) -> u64 {
	h.wrapping_mul(PRIME) ^ x
}

/// Folds raw bytes starting from [`OFFSET`]. Empty input returns `OFFSET`.
pub fn from_bytes(bytes: &[u8]) -> u64 {
	let mut h = OFFSET;
	for &b in bytes {
		h = mix(h, b as u64);
	}
	h
}

/// Folds a UTF-8 string's bytes. Identical to [`from_bytes`]; kept as a
/// distinct name at call sites to document intent (string heap vs blob heap).
#[inline]
pub fn from_utf8(s: &str) -> u64 {
	from_bytes(s.as_bytes())
}

#[inline]
pub fn combine2(a: u64, b: u64) -> u64 {
	mix(a, b)
}

#[inline]
pub fn combine3(a: u64, b: u64, c: u64) -> u64 {
	mix(mix(a, b), c)
}

#[inline]
pub fn combine4(a: u64, b: u64, c: u64, d: u64) -> u64 {
	mix(mix(mix(a, b), c), d)
}

#[inline]
pub fn combine5(a: u64, b: u64, c: u64, d: u64, e: u64) -> u64 {
	mix(mix(mix(mix(a, b), c), d), e)
}

/// Variadic combine for call sites with more than five terms. Still a plain
/// left-fold from `values[0]`.
pub fn combine(values: &[u64]) -> u64 {
	let mut iter = values.iter().copied();
	let mut h = iter.next().unwrap_or(OFFSET);
	for v in iter {
		h = mix(h, v);
	}
	h
}

/// Order-independent combine: starts fresh from [`OFFSET`] and folds each
/// element in whatever order the caller provides. Callers MUST presort
/// (see [`combine_sorted`]) whenever the source ordering is a metadata-layout
/// artifact rather than semantic content.
pub fn combine_seq(values: impl IntoIterator<Item = u64>) -> u64 {
	let mut h = OFFSET;
	for v in values {
		h = mix(h, v);
	}
	h
}

/// Sorts `values` ascending, then [`combine_seq`]s them. Use for any
/// metadata collection whose on-disk order is not semantically meaningful:
/// type definitions in an assembly, members within a type, interface
/// implementations, generic-parameter constraints, custom attributes.
/// Positional collections (method parameters, generic-parameter indices)
/// must never be sorted — use [`combine_seq`] directly.
pub fn combine_sorted(mut values: Vec<u64>) -> u64 {
	values.sort_unstable();
	combine_seq(values)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_bytes_fold_to_offset() {
		assert_eq!(from_bytes(&[]), OFFSET);
	}

	#[test]
	fn combine_is_order_sensitive_for_raw_seq() {
		let a = combine_seq([1, 2, 3]);
		let b = combine_seq([3, 2, 1]);
		assert_ne!(a, b);
	}

	#[test]
	fn combine_sorted_is_order_independent() {
		let a = combine_sorted(vec![1, 2, 3]);
		let b = combine_sorted(vec![3, 1, 2]);
		assert_eq!(a, b);
	}

	#[test]
	fn combine_nests_without_restarting_from_offset() {
		let inner = combine2(OFFSET, 42);
		let outer = combine2(inner, 7);
		assert_ne!(outer, combine2(OFFSET, 7));
	}
}
