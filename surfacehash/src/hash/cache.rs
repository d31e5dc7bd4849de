//! The handle cache: memoizes every hash keyed by the metadata handle it was
//! computed for, and carries the few pieces of cross-cutting state the
//! surface hasher accumulates while walking an assembly (internals-visible
//! gate, well-known-type registry).
//!
//! Four maps, each independent: strings, "usage" hashes for any entity
//! handle, and a *separate* map for the struct-layout hash of a type
//! definition (§4.7.3) — a `TypeDef` can appear in both maps with different
//! values, since its usage hash (namespace+name) and its structural field
//! hash (recursive field-type fold) answer different questions.

use nohash_hasher::{IntMap, IntSet};

use crate::hash::primitive::OFFSET;
use crate::metadata::indices::metadata_token::{MetadataToken, StringToken, TypeDefToken};

#[derive(Debug, Default)]
pub struct HandleCache {
	// Every key here is a newtype around a single `u32`/`usize` whose derived
	// `Hash` impl writes that one integer verbatim, so an identity hasher is
	// exact rather than a lossy shortcut.
	string_hash: IntMap<StringToken, u64>,
	entity_hash: IntMap<MetadataToken, u64>,
	struct_field_hash: IntMap<TypeDefToken, u64>,

	ignored_attribute_types: IntSet<MetadataToken>,
	included_attribute_types: IntSet<MetadataToken>,

	system_value_type: Option<MetadataToken>,
	internals_visible: bool,
}

impl HandleCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn string_hash(&self, handle: StringToken) -> Option<u64> {
		self.string_hash.get(&handle).copied()
	}

	pub fn insert_string_hash(&mut self, handle: StringToken, hash: u64) {
		self.string_hash.entry(handle).or_insert(hash);
	}

	pub fn entity_hash(&self, handle: impl Into<MetadataToken>) -> Option<u64> {
		self.entity_hash.get(&handle.into()).copied()
	}

	pub fn insert_entity_hash(&mut self, handle: impl Into<MetadataToken>, hash: u64) {
		self.entity_hash.entry(handle.into()).or_insert(hash);
	}

	pub fn struct_field_hash(&self, handle: TypeDefToken) -> Option<u64> {
		self.struct_field_hash.get(&handle).copied()
	}

	/// Overwrites the slot reserved by [`Self::reserve_struct_field_hash`]
	/// with the fully-computed hash. Unlike the other maps this is not
	/// write-once: the placeholder inserted to break a cycle must be
	/// replaced once recursion unwinds back to the type that owns it.
	pub fn insert_struct_field_hash(&mut self, handle: TypeDefToken, hash: u64) {
		self.struct_field_hash.insert(handle, hash);
	}

	/// Breaks recursive struct layouts (e.g. `System.Int32` containing an
	/// `Int32` field in mscorlib): pre-stores the empty-structural-fingerprint
	/// placeholder *before* descending into the type's own fields, so a cycle
	/// resolves to `OFFSET` rather than looping forever. Returns `false` if a
	/// slot already exists (either the placeholder, mid-recursion, or the
	/// final value) — the caller should reuse it rather than recurse again.
	pub fn reserve_struct_field_hash(&mut self, handle: TypeDefToken) -> bool {
		if self.struct_field_hash.contains_key(&handle) {
			return false;
		}
		self.struct_field_hash.insert(handle, OFFSET);
		true
	}

	pub fn is_ignored_attribute_type(&self, handle: impl Into<MetadataToken>) -> bool {
		self.ignored_attribute_types.contains(&handle.into())
	}

	pub fn is_included_attribute_type(&self, handle: impl Into<MetadataToken>) -> bool {
		self.included_attribute_types.contains(&handle.into())
	}

	pub fn mark_ignored_attribute_type(&mut self, handle: impl Into<MetadataToken>) {
		self.ignored_attribute_types.insert(handle.into());
	}

	pub fn mark_included_attribute_type(&mut self, handle: impl Into<MetadataToken>) {
		self.included_attribute_types.insert(handle.into());
	}

	pub fn system_value_type(&self) -> Option<MetadataToken> {
		self.system_value_type
	}

	/// Records `System.ValueType` the first time it's sighted — almost always
	/// as a `TypeRef`, since the hashed assembly references it rather than
	/// defining it. Later calls are no-ops, matching the write-once-in-effect
	/// semantics of the other maps.
	pub fn set_system_value_type(&mut self, handle: impl Into<MetadataToken>) {
		self.system_value_type.get_or_insert(handle.into());
	}

	pub fn internals_visible(&self) -> bool {
		self.internals_visible
	}

	pub fn set_internals_visible(&mut self) {
		self.internals_visible = true;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn entity_hash_insert_is_write_once() {
		let mut cache = HandleCache::new();
		let handle = TypeDefToken(1);
		cache.insert_entity_hash(handle, 42);
		cache.insert_entity_hash(handle, 99);
		assert_eq!(cache.entity_hash(handle), Some(42));
	}

	#[test]
	fn reserve_struct_field_hash_breaks_cycles_with_offset() {
		let mut cache = HandleCache::new();
		let handle = TypeDefToken(7);
		assert!(cache.reserve_struct_field_hash(handle));
		assert_eq!(cache.struct_field_hash(handle), Some(OFFSET));
		assert!(!cache.reserve_struct_field_hash(handle));
	}

	#[test]
	fn struct_field_hash_and_entity_hash_are_independent() {
		let mut cache = HandleCache::new();
		let handle = TypeDefToken(3);
		cache.insert_entity_hash(handle, 10);
		cache.reserve_struct_field_hash(handle);
		cache.insert_struct_field_hash(handle, 20);
		assert_eq!(cache.entity_hash(handle), Some(10));
		assert_eq!(cache.struct_field_hash(handle), Some(20));
	}
}
