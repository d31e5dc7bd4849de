//! Well-known-type registry (§4.6).
//!
//! Populated as a side effect of resolving a type reference or definition
//! usage: whenever the surface hasher resolves a handle's namespace and
//! name, it reports them here so later custom-attribute filtering (§4.6, used
//! by §4.7's attribute-hash step) and struct-layout detection (§4.7.3, which
//! needs to recognize `System.ValueType` as a base type) can consult the
//! registry without re-resolving the handle.
//!
//! Namespace comparisons are hash-filtered before the full string compare:
//! a mismatched FNV hash rules a namespace out in one integer comparison,
//! and the string compare that follows only runs to rule out a hash
//! collision, never to do the actual classification.

use crate::hash::cache::HandleCache;
use crate::hash::primitive::from_utf8;
use crate::metadata::indices::metadata_token::MetadataToken;

const COMPILER_SERVICES_NS: &str = "System.Runtime.CompilerServices";
const SYSTEM_NS: &str = "System";
const CODE_ANALYSIS_NS: &str = "System.Diagnostics.CodeAnalysis";

fn namespace_is(namespace: &str, candidate: &str, candidate_hash: u64) -> bool {
	from_utf8(namespace) == candidate_hash && namespace == candidate
}

/// Records a resolved type handle (`TypeRef` or `TypeDef` usage) against the
/// well-known-type tables. Idempotent — the underlying cache inserts are
/// write-once.
pub fn observe_type(cache: &mut HandleCache, handle: impl Into<MetadataToken>, namespace: &str, name: &str) {
	let handle = handle.into();

	if namespace_is(namespace, COMPILER_SERVICES_NS, from_utf8(COMPILER_SERVICES_NS)) {
		match name {
			"CompilerGeneratedAttribute" => cache.mark_ignored_attribute_type(handle),
			_ => cache.mark_included_attribute_type(handle),
		}
		return;
	}

	if namespace_is(namespace, SYSTEM_NS, from_utf8(SYSTEM_NS)) {
		match name {
			"ValueType" => cache.set_system_value_type(handle),
			"ObsoleteAttribute" | "AttributeUsageAttribute" | "FlagsAttribute" | "ParamArrayAttribute" => {
				cache.mark_included_attribute_type(handle)
			},
			_ => {},
		}
		return;
	}

	if namespace_is(namespace, CODE_ANALYSIS_NS, from_utf8(CODE_ANALYSIS_NS)) {
		cache.mark_included_attribute_type(handle);
	}
}

/// True if `base_type` is the handle previously recorded for
/// `System.ValueType` — the trigger condition for struct-layout hashing
/// (§4.7.3).
pub fn is_system_value_type(cache: &HandleCache, base_type: impl Into<MetadataToken>) -> bool {
	cache.system_value_type() == Some(base_type.into())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metadata::indices::metadata_token::TypeRefToken;

	#[test]
	fn compiler_generated_attribute_is_ignored() {
		let mut cache = HandleCache::new();
		let handle = TypeRefToken(1);
		observe_type(&mut cache, handle, COMPILER_SERVICES_NS, "CompilerGeneratedAttribute");
		assert!(cache.is_ignored_attribute_type(handle));
	}

	#[test]
	fn other_compiler_services_types_are_included() {
		let mut cache = HandleCache::new();
		let handle = TypeRefToken(2);
		observe_type(&mut cache, handle, COMPILER_SERVICES_NS, "IsReadOnlyAttribute");
		assert!(cache.is_included_attribute_type(handle));
	}

	#[test]
	fn value_type_is_recorded_once() {
		let mut cache = HandleCache::new();
		let handle = TypeRefToken(3);
		observe_type(&mut cache, handle, SYSTEM_NS, "ValueType");
		assert!(is_system_value_type(&cache, handle));

		let other = TypeRefToken(4);
		observe_type(&mut cache, other, SYSTEM_NS, "ValueType");
		assert!(is_system_value_type(&cache, handle));
		assert!(!is_system_value_type(&cache, other));
	}

	#[test]
	fn unrelated_namespace_is_ignored() {
		let mut cache = HandleCache::new();
		let handle = TypeRefToken(5);
		observe_type(&mut cache, handle, "MyCompany.Widgets", "Widget");
		assert!(!cache.is_included_attribute_type(handle));
		assert!(!cache.is_ignored_attribute_type(handle));
	}
}
