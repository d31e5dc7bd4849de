//! The surface-hash orchestrator.
//!
//! Walks every metadata table exactly once, folding each public-surface
//! definition into a single running FNV-1a accumulator. Two concerns stay
//! deliberately separate: resolving what a handle refers to (this module,
//! via the handle cache) and decoding how a signature blob is shaped
//! (`hash::signature`). Everything here speaks in rids and tokens; heap
//! slices and signature blobs are the only data that outlives a single
//! hashing pass, which is why most lookups return `&'a ...` rather than
//! something tied to `&self`.

use std::io;
use std::ops::Range;

use bitflags::bitflags;
use fxhash::FxHashSet;

use crate::hash::attributes::{hash_custom_attribute, hash_custom_attribute_set};
use crate::hash::cache::HandleCache;
use crate::hash::primitive::{combine, combine2, combine3, combine4, combine5, combine_seq, combine_sorted, from_bytes, from_utf8, OFFSET};
use crate::hash::resource::hash_resource_body;
use crate::hash::signature::{SignatureReader, SignatureTypeResolver};
use crate::hash::surface::{access_is_in_surface, resource_is_in_surface, type_is_in_surface, MemberAccess, TypeVisibility};
use crate::hash::well_known;
use crate::metadata::assembly::Assembly as ParsedAssembly;
use crate::metadata::heaps::table::*;
use crate::metadata::heaps::{BlobHeap, BlobIndex, StringHeap, StringIndex};
use crate::metadata::indices::coded_index::*;
use crate::metadata::indices::metadata_token::*;
use crate::metadata::indices::simple_index::*;

const TYPE_SURFACE_FLAGS: TypeAttributes = TypeAttributes::ABSTRACT
	.union(TypeAttributes::SEALED)
	.union(TypeAttributes::SPECIAL_NAME)
	.union(TypeAttributes::RTSpecialName)
	.union(TypeAttributes::CLASS_SEMANTICS_MASK)
	.union(TypeAttributes::VISIBILITY_MASK);

const FIELD_SURFACE_FLAGS: FieldAttributes = FieldAttributes::FIELD_ACCESS_MASK
	.union(FieldAttributes::STATIC)
	.union(FieldAttributes::INIT_ONLY)
	.union(FieldAttributes::LITERAL)
	.union(FieldAttributes::SPECIAL_NAME);

const METHOD_SURFACE_FLAGS: MethodAttributes = MethodAttributes::MEMBER_ACCESS_MASK
	.union(MethodAttributes::STATIC)
	.union(MethodAttributes::ABSTRACT)
	.union(MethodAttributes::VIRTUAL)
	.union(MethodAttributes::FINAL)
	.union(MethodAttributes::SPECIAL_NAME);

const PARAM_SURFACE_FLAGS: ParamAttributes = ParamAttributes::IN
	.union(ParamAttributes::OUT)
	.union(ParamAttributes::OPTIONAL)
	.union(ParamAttributes::HAS_DEFAULT);

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq)]
	pub struct HashOptions: u32 {
		/// Fold every custom attribute into the hash, skipping the
		/// well-known-type ignore filter entirely (see `hash::well_known`) -
		/// including attributes normally dropped, such as
		/// `CompilerGeneratedAttribute`.
		const INCLUDE_ALL_ATTRIBUTES = 0x1;
	}
}

impl Default for HashOptions {
	fn default() -> Self {
		Self::empty()
	}
}

fn bad_image() -> io::Error {
	io::ErrorKind::InvalidData.into()
}

fn token_as<T>(token: MetadataToken) -> io::Result<T>
where
	T: TryFrom<MetadataToken, Error = ()>,
{
	T::try_from(token).map_err(|_| bad_image())
}

/// A resolved `TypeDefOrRef` handle, dispatched to the matching usage-hash
/// routine. Distinct from `signature::TypeDefOrRef`, which is the same
/// three-way split as it appears inline in a signature blob rather than as a
/// standalone coded index.
#[derive(Debug, Copy, Clone)]
enum TypeHandle {
	TypeDef(TypeDefToken),
	TypeRef(TypeRefToken),
	TypeSpec(TypeSpecToken),
}

fn type_handle_from_token(token: MetadataToken) -> io::Result<TypeHandle> {
	match token.kind() {
		MetadataTokenKind::TypeDef => Ok(TypeHandle::TypeDef(token_as(token)?)),
		MetadataTokenKind::TypeRef => Ok(TypeHandle::TypeRef(token_as(token)?)),
		MetadataTokenKind::TypeSpec => Ok(TypeHandle::TypeSpec(token_as(token)?)),
		_ => Err(bad_image()),
	}
}

fn type_handle_token(handle: TypeHandle) -> MetadataToken {
	match handle {
		TypeHandle::TypeDef(t) => t.into(),
		TypeHandle::TypeRef(t) => t.into(),
		TypeHandle::TypeSpec(t) => t.into(),
	}
}

/// Walks an assembly's metadata once and produces its surface hash.
/// Borrowed heaps live for `'a`, the lifetime of the parsed [`ParsedAssembly`];
/// everything mutable (the memo cache, the accessor-method set) is owned.
pub struct SurfaceHasher<'a> {
	assembly: &'a ParsedAssembly,
	tables: &'a TableHeap,
	strings: &'a StringHeap,
	blobs: &'a BlobHeap,
	assembly_name: String,
	cache: HandleCache,
	options: HashOptions,
	/// Rids of `MethodDef` rows already confirmed to be in-surface property or
	/// event accessors, populated while `hash_members` walks a type's methods.
	/// Consulted by `accessor_is_in_surface` so the surface property/event
	/// hash never depends on an accessor method that was itself excluded.
	accessor_methods: FxHashSet<usize>,
}

impl<'a> SurfaceHasher<'a> {
	pub fn new(assembly: &'a ParsedAssembly, options: HashOptions) -> io::Result<Self> {
		let root = assembly.metadata_root();
		let tables = root.get_heap::<TableHeap>().ok_or_else(bad_image)?;
		let strings = root.get_heap::<StringHeap>().ok_or_else(bad_image)?;
		let blobs = root.get_heap::<BlobHeap>().ok_or_else(bad_image)?;

		let assembly_name = match tables.get_table::<AssemblyTable>().and_then(|t| t.get(1)) {
			Some(row) => strings.get(row.name).ok_or_else(bad_image)?.to_owned(),
			None => String::new(),
		};

		Ok(Self {
			assembly,
			tables,
			strings,
			blobs,
			assembly_name,
			options,
			cache: HandleCache::new(),
			accessor_methods: FxHashSet::default(),
		})
	}

	pub fn compute(&mut self) -> io::Result<u64> {
		let assembly_def_hash = self.hash_assembly_definition()?;
		self.detect_internals_visible()?;

		let assembly_attrs_hash = self.custom_attributes_for(MetadataToken::from(AssemblyToken(1)))?;
		let module_attrs_hash = match self.modules() {
			Some(table) if !table.rows().is_empty() => self.custom_attributes_for(MetadataToken::from(ModuleToken(1)))?,
			_ => OFFSET,
		};

		let mut surface_hashes = Vec::new();

		if let Some(table) = self.type_defs() {
			for rid in 1..=table.rows().len() {
				if self.type_definition_is_in_surface(rid)? {
					surface_hashes.push(self.hash_type_definition_surface(rid)?);
				}
			}
		}

		if let Some(table) = self.exported_types() {
			for rid in 1..=table.rows().len() {
				if let Some(hash) = self.hash_exported_type_if_in_surface(rid)? {
					surface_hashes.push(hash);
				}
			}
		}

		if let Some(table) = self.manifest_resources() {
			for rid in 1..=table.rows().len() {
				if let Some(hash) = self.hash_manifest_resource_if_in_surface(rid)? {
					surface_hashes.push(hash);
				}
			}
		}

		let surface_hash = combine_sorted(surface_hashes);
		Ok(combine4(surface_hash, assembly_def_hash, assembly_attrs_hash, module_attrs_hash))
	}

	fn get_string(&self, idx: StringIndex) -> io::Result<&'a str> {
		self.strings.get(idx).ok_or_else(bad_image)
	}

	fn get_blob(&self, idx: BlobIndex) -> io::Result<&'a [u8]> {
		self.blobs.get(idx).ok_or_else(bad_image)
	}

	fn type_defs(&self) -> Option<&'a TypeDefTable> {
		self.tables.get_table()
	}
	fn type_refs(&self) -> Option<&'a TypeRefTable> {
		self.tables.get_table()
	}
	fn type_specs(&self) -> Option<&'a TypeSpecTable> {
		self.tables.get_table()
	}
	fn fields(&self) -> Option<&'a FieldTable> {
		self.tables.get_table()
	}
	fn methods(&self) -> Option<&'a MethodDefTable> {
		self.tables.get_table()
	}
	fn params(&self) -> Option<&'a ParamTable> {
		self.tables.get_table()
	}
	fn member_refs(&self) -> Option<&'a MemberRefTable> {
		self.tables.get_table()
	}
	fn constants(&self) -> Option<&'a ConstantTable> {
		self.tables.get_table()
	}
	fn custom_attributes(&self) -> Option<&'a CustomAttributeTable> {
		self.tables.get_table()
	}
	fn interface_impls(&self) -> Option<&'a InterfaceImplTable> {
		self.tables.get_table()
	}
	fn nested_classes(&self) -> Option<&'a NestedClassTable> {
		self.tables.get_table()
	}
	fn generic_params(&self) -> Option<&'a GenericParamTable> {
		self.tables.get_table()
	}
	fn generic_param_constraints(&self) -> Option<&'a GenericParamConstraintTable> {
		self.tables.get_table()
	}
	fn property_maps(&self) -> Option<&'a PropertyMapTable> {
		self.tables.get_table()
	}
	fn properties(&self) -> Option<&'a PropertyTable> {
		self.tables.get_table()
	}
	fn event_maps(&self) -> Option<&'a EventMapTable> {
		self.tables.get_table()
	}
	fn events(&self) -> Option<&'a EventTable> {
		self.tables.get_table()
	}
	fn method_semantics(&self) -> Option<&'a MethodSemanticsTable> {
		self.tables.get_table()
	}
	fn exported_types(&self) -> Option<&'a ExportedTypeTable> {
		self.tables.get_table()
	}
	fn manifest_resources(&self) -> Option<&'a ManifestResourceTable> {
		self.tables.get_table()
	}
	fn assembly_refs(&self) -> Option<&'a AssemblyRefTable> {
		self.tables.get_table()
	}
	fn assemblies(&self) -> Option<&'a AssemblyTable> {
		self.tables.get_table()
	}
	fn modules(&self) -> Option<&'a ModuleTable> {
		self.tables.get_table()
	}

	/// `TypeDef.field_list` runs from this row's start up to the next row's
	/// start (or the table's end for the last row) - the classic
	/// "next-row-starts-where-this-one-ends" range convention ECMA-335 uses
	/// for every list-valued column.
	fn field_range(&self, rid: usize) -> io::Result<Range<usize>> {
		let table = self.type_defs().ok_or_else(bad_image)?;
		let row = table.get(rid).ok_or_else(bad_image)?;
		let start = row.field_list.0;
		let end = match table.get(rid + 1) {
			Some(next) => next.field_list.0,
			None => self.fields().map(|t| t.rows().len() + 1).unwrap_or(1),
		};
		Ok(start..end)
	}

	fn method_range(&self, rid: usize) -> io::Result<Range<usize>> {
		let table = self.type_defs().ok_or_else(bad_image)?;
		let row = table.get(rid).ok_or_else(bad_image)?;
		let start = row.method_list.0;
		let end = match table.get(rid + 1) {
			Some(next) => next.method_list.0,
			None => self.methods().map(|t| t.rows().len() + 1).unwrap_or(1),
		};
		Ok(start..end)
	}

	fn param_range(&self, rid: usize) -> io::Result<Range<usize>> {
		let table = self.methods().ok_or_else(bad_image)?;
		let row = table.get(rid).ok_or_else(bad_image)?;
		let start = row.param_list.0;
		let end = match table.get(rid + 1) {
			Some(next) => next.param_list.0,
			None => self.params().map(|t| t.rows().len() + 1).unwrap_or(1),
		};
		Ok(start..end)
	}

	/// Unlike `field_range`/`method_range`, a type's property/event range
	/// isn't keyed by the type's own rid - `PropertyMap`/`EventMap` are an
	/// indirection table, so the boundary comes from *that* table's row
	/// layout, not the `TypeDef`'s.
	fn property_range(&self, type_rid: usize) -> io::Result<Range<usize>> {
		let Some(map) = self.property_maps() else { return Ok(1..1) };
		let Some(map_rid) = map.rows().iter().position(|r| r.parent.0 == type_rid).map(|i| i + 1) else {
			return Ok(1..1);
		};
		let row = map.get(map_rid).ok_or_else(bad_image)?;
		let start = row.property_list.0;
		let end = match map.get(map_rid + 1) {
			Some(next) => next.property_list.0,
			None => self.properties().map(|t| t.rows().len() + 1).unwrap_or(1),
		};
		Ok(start..end)
	}

	fn event_range(&self, type_rid: usize) -> io::Result<Range<usize>> {
		let Some(map) = self.event_maps() else { return Ok(1..1) };
		let Some(map_rid) = map.rows().iter().position(|r| r.parent.0 == type_rid).map(|i| i + 1) else {
			return Ok(1..1);
		};
		let row = map.get(map_rid).ok_or_else(bad_image)?;
		let start = row.event_list.0;
		let end = match map.get(map_rid + 1) {
			Some(next) => next.event_list.0,
			None => self.events().map(|t| t.rows().len() + 1).unwrap_or(1),
		};
		Ok(start..end)
	}

	fn hash_type_handle_usage(&mut self, handle: TypeHandle) -> io::Result<u64> {
		match handle {
			TypeHandle::TypeDef(t) => self.hash_type_definition_usage(t),
			TypeHandle::TypeRef(t) => self.hash_type_reference(t),
			TypeHandle::TypeSpec(t) => self.hash_type_spec(t),
		}
	}

	/// A type definition's identity as seen from elsewhere (base type,
	/// interface, field type, attribute ctor owner, ...): namespace + name
	/// only. Members are folded separately by `hash_type_definition_surface`
	/// when the type itself is being hashed as a surface member, not when it
	/// is merely referenced.
	fn hash_type_definition_usage(&mut self, handle: TypeDefToken) -> io::Result<u64> {
		if let Some(hash) = self.cache.entity_hash(handle) {
			return Ok(hash);
		}
		let row = self.type_defs().ok_or_else(bad_image)?.get(handle.0).ok_or_else(bad_image)?;
		let ns = self.get_string(row.type_namespace)?;
		let name = self.get_string(row.type_name)?;
		well_known::observe_type(&mut self.cache, handle, ns, name);
		let hash = combine2(from_utf8(ns), from_utf8(name));
		self.cache.insert_entity_hash(handle, hash);
		Ok(hash)
	}

	fn hash_type_reference(&mut self, handle: TypeRefToken) -> io::Result<u64> {
		if let Some(hash) = self.cache.entity_hash(handle) {
			return Ok(hash);
		}
		let row = self.type_refs().ok_or_else(bad_image)?.get(handle.0).ok_or_else(bad_image)?;
		let ns = self.get_string(row.type_namespace)?;
		let name = self.get_string(row.type_name)?;
		well_known::observe_type(&mut self.cache, handle, ns, name);

		let scope_token = MetadataToken::from(row.resolution_scope);
		let scope_hash = match scope_token.kind() {
			MetadataTokenKind::AssemblyRef => self.hash_assembly_ref(token_as(scope_token)?)?,
			MetadataTokenKind::TypeRef => self.hash_type_reference(token_as(scope_token)?)?,
			// Module/ModuleRef scopes (same-module or multi-module assemblies)
			// fall back to the namespace+name pair: there is no further
			// identity to resolve against within this assembly's own tables.
			_ => combine2(from_utf8(ns), from_utf8(name)),
		};

		let hash = combine3(scope_hash, from_utf8(ns), from_utf8(name));
		self.cache.insert_entity_hash(handle, hash);
		Ok(hash)
	}

	fn hash_assembly_ref(&mut self, handle: AssemblyRefToken) -> io::Result<u64> {
		if let Some(hash) = self.cache.entity_hash(handle) {
			return Ok(hash);
		}
		let row = self.assembly_refs().ok_or_else(bad_image)?.get(handle.0).ok_or_else(bad_image)?;
		let name = from_utf8(self.get_string(row.name)?);
		let culture = from_utf8(self.get_string(row.culture)?);
		let version = combine4(row.major_version as u64, row.minor_version as u64, row.build_number as u64, row.revision_number as u64);
		let key = from_bytes(self.get_blob(row.public_key_or_token)?);
		let hash = combine4(name, version, culture, key);
		self.cache.insert_entity_hash(handle, hash);
		Ok(hash)
	}

	fn hash_type_spec(&mut self, handle: TypeSpecToken) -> io::Result<u64> {
		if let Some(hash) = self.cache.entity_hash(handle) {
			return Ok(hash);
		}
		let row = self.type_specs().ok_or_else(bad_image)?.get(handle.0).ok_or_else(bad_image)?;
		let blob = self.get_blob(row.signature)?;
		let sig_hash = {
			let mut reader = SignatureReader::new(blob);
			let mut resolver = UsageResolver { hasher: self };
			reader.hash_type(&mut resolver)?
		};
		let attrs_hash = self.custom_attributes_for(MetadataToken::from(handle))?;
		let hash = combine2(sig_hash, attrs_hash);
		self.cache.insert_entity_hash(handle, hash);
		Ok(hash)
	}

	fn hash_member_ref(&mut self, handle: MemberRefToken) -> io::Result<u64> {
		if let Some(hash) = self.cache.entity_hash(handle) {
			return Ok(hash);
		}
		let row = self.member_refs().ok_or_else(bad_image)?.get(handle.0).ok_or_else(bad_image)?;
		let name = from_utf8(self.get_string(row.name)?);
		let blob = self.get_blob(row.signature)?;

		const FIELD_SIG_TAG: u8 = 0x06;
		let sig_hash = if blob.first() == Some(&FIELD_SIG_TAG) {
			let mut reader = SignatureReader::new(blob);
			let mut resolver = UsageResolver { hasher: self };
			reader.field_signature(&mut resolver)?
		} else {
			let mut reader = SignatureReader::new(blob);
			let mut resolver = UsageResolver { hasher: self };
			// A MemberRef stands in for another assembly's member identity, so
			// its generic-parameter count folds into the signature hash itself
			// rather than as a separate term, matching a same-assembly method
			// definition's identity hash.
			reader.method_signature(&mut resolver)?.hash_with_generic_count()
		};

		let attrs_hash = self.custom_attributes_for(MetadataToken::from(handle))?;
		let hash = combine3(name, sig_hash, attrs_hash);
		self.cache.insert_entity_hash(handle, hash);
		Ok(hash)
	}

	/// A same-assembly method used as an attribute constructor. Mirrors
	/// `hash_member_ref`'s shape (no declaring-type term, no own-attributes
	/// fold) purely to keep the two identity hashes comparable; a method
	/// referenced via a `MemberRef` in one assembly and defined directly in
	/// another must still hash the same way when both name the same ctor.
	fn hash_method_def_usage(&mut self, handle: MethodDefToken) -> io::Result<u64> {
		if let Some(hash) = self.cache.entity_hash(handle) {
			return Ok(hash);
		}
		let row = self.methods().ok_or_else(bad_image)?.get(handle.0).ok_or_else(bad_image)?;
		let name = from_utf8(self.get_string(row.name)?);
		let blob = self.get_blob(row.signature)?;
		let sig_hash = {
			let mut reader = SignatureReader::new(blob);
			let mut resolver = UsageResolver { hasher: self };
			// Same reasoning as `hash_member_ref`: there is no richer per-parameter
			// `GenericParam` fold available at a usage site, so the signature's own
			// declared arity is the only generic-parameter information to fold in.
			reader.method_signature(&mut resolver)?.hash_with_generic_count()
		};
		let hash = combine2(name, sig_hash);
		self.cache.insert_entity_hash(handle, hash);
		Ok(hash)
	}

	/// Generic-parameter *names* are never folded in - only position, flags,
	/// constraints and attributes - and the resulting per-parameter hashes are
	/// sorted before combining, so `C<T, U>` and `C<U, T>` (an alpha-renaming,
	/// not a distinct signature) hash identically.
	fn hash_generic_params_for(&mut self, owner_token: MetadataToken) -> io::Result<u64> {
		let Some(table) = self.generic_params() else { return Ok(combine_sorted(Vec::new())) };
		let rids: Vec<usize> = table
			.rows()
			.iter()
			.enumerate()
			.filter(|(_, r)| MetadataToken::from(r.owner) == owner_token)
			.map(|(i, _)| i + 1)
			.collect();

		let mut hashes = Vec::with_capacity(rids.len());
		for rid in rids {
			let row = table.get(rid).ok_or_else(bad_image)?;
			let number = row.number as u64;
			let flags = row.flags.bits() as u64;
			let constraints = self.hash_generic_param_constraints(GenericParamIndex(rid))?;
			let attrs = self.custom_attributes_for(MetadataToken::from(GenericParamToken(rid)))?;
			hashes.push(combine4(number, flags, constraints, attrs));
		}
		Ok(combine_sorted(hashes))
	}

	fn hash_generic_param_constraints(&mut self, gp: GenericParamIndex) -> io::Result<u64> {
		let Some(table) = self.generic_param_constraints() else { return Ok(combine_sorted(Vec::new())) };
		let rids: Vec<usize> = table.rows().iter().enumerate().filter(|(_, r)| r.owner == gp).map(|(i, _)| i + 1).collect();

		let mut hashes = Vec::with_capacity(rids.len());
		for rid in rids {
			let row = table.get(rid).ok_or_else(bad_image)?;
			let handle = type_handle_from_token(MetadataToken::from(row.constraint))?;
			let usage = self.hash_type_handle_usage(handle)?;
			let attrs = self.custom_attributes_for(MetadataToken::from(GenericParamConstraintToken(rid)))?;
			hashes.push(combine2(usage, attrs));
		}
		Ok(combine_sorted(hashes))
	}

	fn hash_super_types(&mut self, rid: usize) -> io::Result<u64> {
		let row = self.type_defs().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?;
		let extends_token = MetadataToken::from(row.extends);
		let base_hash = if extends_token.index() == 0 {
			OFFSET
		} else {
			let handle = type_handle_from_token(extends_token)?;
			self.hash_type_handle_usage(handle)?
		};

		let Some(table) = self.interface_impls() else {
			return Ok(combine2(base_hash, combine_sorted(Vec::new())));
		};

		let mut interface_hashes = Vec::new();
		for (i, row) in table.rows().iter().enumerate() {
			if row.class.0 != rid {
				continue;
			}
			let iface_token = MetadataToken::from(row.interface);
			let handle = type_handle_from_token(iface_token)?;
			// An external interface's own surface membership can't be
			// determined from this assembly's tables, so only a locally
			// defined, out-of-surface interface is skipped here.
			if let TypeHandle::TypeDef(t) = handle {
				if !self.type_definition_is_in_surface(t.0)? {
					continue;
				}
			}
			let usage = self.hash_type_handle_usage(handle)?;
			let attrs = self.custom_attributes_for(MetadataToken::from(InterfaceImplToken(i + 1)))?;
			interface_hashes.push(combine2(usage, attrs));
		}
		Ok(combine2(base_hash, combine_sorted(interface_hashes)))
	}

	fn enclosing_type_rid(&self, rid: usize) -> Option<usize> {
		let table = self.nested_classes()?;
		table.rows().iter().find(|r| r.nested_class.0 == rid).map(|r| r.enclosing_class.0)
	}

	fn hash_containing_type(&mut self, rid: usize) -> io::Result<u64> {
		match self.enclosing_type_rid(rid) {
			Some(enclosing) => self.hash_type_definition_usage(TypeDefToken(enclosing)),
			None => Ok(OFFSET),
		}
	}

	/// Walks the nested-class chain outward: every enclosing type must also
	/// satisfy the surface predicate, or a `public` type nested inside a
	/// `private` one would leak into the surface.
	fn type_definition_is_in_surface(&self, rid: usize) -> io::Result<bool> {
		let mut current = Some(rid);
		while let Some(r) = current {
			let row = self.type_defs().ok_or_else(bad_image)?.get(r).ok_or_else(bad_image)?;
			let code = (row.flags & TypeAttributes::VISIBILITY_MASK).bits();
			let visibility = TypeVisibility::from_masked_code(code).ok_or_else(bad_image)?;
			let name = self.get_string(row.type_name)?;
			if !type_is_in_surface(visibility, name, self.cache.internals_visible()) {
				return Ok(false);
			}
			current = self.enclosing_type_rid(r);
		}
		Ok(true)
	}

	/// True once `System.ValueType` has been observed anywhere as a base type
	/// and this type's own `extends` resolves to that same handle - the
	/// trigger for struct-layout hashing.
	fn type_is_value_type(&mut self, handle: TypeDefToken) -> io::Result<bool> {
		let row = self.type_defs().ok_or_else(bad_image)?.get(handle.0).ok_or_else(bad_image)?;
		let extends_token = MetadataToken::from(row.extends);
		if extends_token.index() == 0 {
			return Ok(false);
		}
		let base_handle = type_handle_from_token(extends_token)?;
		self.hash_type_handle_usage(base_handle)?;
		Ok(well_known::is_system_value_type(&self.cache, type_handle_token(base_handle)))
	}

	/// The structural fingerprint of a value type's instance fields (§4.7.3):
	/// field types are decoded recursively through nested value types rather
	/// than by usage hash, so that widening a private field of a struct
	/// changes the hash of every type that embeds it by value. Recursive
	/// layouts (an `Int32` field inside `System.Int32` itself) are broken by
	/// reserving an `OFFSET` placeholder before recursing.
	fn struct_field_hash(&mut self, handle: TypeDefToken) -> io::Result<u64> {
		if let Some(hash) = self.cache.struct_field_hash(handle) {
			return Ok(hash);
		}

		if !self.type_is_value_type(handle)? {
			let hash = self.hash_type_definition_usage(handle)?;
			self.cache.insert_struct_field_hash(handle, hash);
			return Ok(hash);
		}

		if !self.cache.reserve_struct_field_hash(handle) {
			return Ok(self.cache.struct_field_hash(handle).unwrap_or(OFFSET));
		}

		let range = self.field_range(handle.0)?;
		let mut hashes = Vec::new();
		for rid in range {
			let row = self.fields().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
			if row.flags.intersects(FieldAttributes::STATIC | FieldAttributes::LITERAL) {
				continue;
			}
			let blob = self.get_blob(row.signature)?;
			let mut reader = SignatureReader::new(blob);
			let mut resolver = StructFieldResolver { hasher: self };
			hashes.push(reader.field_signature(&mut resolver)?);
		}
		let hash = combine_sorted(hashes);
		self.cache.insert_struct_field_hash(handle, hash);
		Ok(hash)
	}

	/// Folds every in-surface field, method, property and event of a type
	/// definition. A value type's instance-field layout is folded as one
	/// extra member alongside the individually-surfaced fields, so a
	/// `private` field still changes the hash of a `struct` even though it
	/// would otherwise be excluded by `access_is_in_surface`.
	fn hash_members(&mut self, handle: TypeDefToken) -> io::Result<u64> {
		let internals_visible = self.cache.internals_visible();
		let is_value_type = self.type_is_value_type(handle)?;

		let mut hashes = Vec::new();
		let mut has_instance_fields = false;

		let field_range = self.field_range(handle.0)?;
		for rid in field_range {
			let row = self.fields().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
			if !row.flags.intersects(FieldAttributes::STATIC | FieldAttributes::LITERAL) {
				has_instance_fields = true;
			}
			let code = (row.flags & FieldAttributes::FIELD_ACCESS_MASK).bits();
			let access = MemberAccess::from_masked_code(code).ok_or_else(bad_image)?;
			if access_is_in_surface(access, internals_visible) {
				hashes.push(self.hash_field_member(FieldToken(rid), &row)?);
			}
		}

		if is_value_type && has_instance_fields {
			hashes.push(self.struct_field_hash(handle)?);
		}

		let method_range = self.method_range(handle.0)?;
		for rid in method_range {
			let row = self.methods().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
			let code = (row.flags & MethodAttributes::MEMBER_ACCESS_MASK).bits();
			let access = MemberAccess::from_masked_code(code).ok_or_else(bad_image)?;
			let in_surface = access_is_in_surface(access, internals_visible);

			if in_surface && row.flags.contains(MethodAttributes::SPECIAL_NAME) {
				let name = self.get_string(row.name)?;
				if name != ".ctor" && name != ".cctor" {
					self.accessor_methods.insert(rid);
				}
			}
			if in_surface {
				hashes.push(self.hash_method_member(MethodDefToken(rid), &row)?);
			}
		}

		hashes.extend(self.hash_properties_for(handle.0)?);
		hashes.extend(self.hash_events_for(handle.0)?);

		Ok(combine_sorted(hashes))
	}

	fn hash_field_member(&mut self, field: FieldToken, row: &Field) -> io::Result<u64> {
		let name = from_utf8(self.get_string(row.name)?);
		let masked = (row.flags & FIELD_SURFACE_FLAGS).bits() as u64;

		let blob = self.get_blob(row.signature)?;
		let type_hash = {
			let mut reader = SignatureReader::new(blob);
			let mut resolver = UsageResolver { hasher: self };
			reader.field_signature(&mut resolver)?
		};

		let constant_hash = match row.flags.contains(FieldAttributes::LITERAL) {
			true => self.hash_constant_for(MetadataToken::from(field))?,
			false => OFFSET,
		};

		let attrs_hash = self.custom_attributes_for(MetadataToken::from(field))?;
		Ok(combine5(name, masked, type_hash, constant_hash, attrs_hash))
	}

	fn hash_method_member(&mut self, method: MethodDefToken, row: &MethodDef) -> io::Result<u64> {
		let name_hash = from_utf8(self.get_string(row.name)?);
		let masked = (row.flags & METHOD_SURFACE_FLAGS).bits() as u64;
		let generic_hash = self.hash_generic_params_for(MetadataToken::from(method))?;

		let param_range = self.param_range(method.0)?;
		let mut param_hashes = Vec::with_capacity(param_range.len());
		for rid in param_range {
			let row = self.params().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
			param_hashes.push(self.hash_parameter(ParamToken(rid), &row)?);
		}

		let blob = self.get_blob(row.signature)?;
		let sig_base_hash = {
			let mut reader = SignatureReader::new(blob);
			let mut resolver = UsageResolver { hasher: self };
			reader.method_signature(&mut resolver)?.base_hash()
		};

		let attrs_hash = self.custom_attributes_for(MetadataToken::from(method))?;

		Ok(combine(&[name_hash, masked, generic_hash, combine_seq(param_hashes), sig_base_hash, attrs_hash]))
	}

	fn hash_parameter(&mut self, param: ParamToken, row: &Param) -> io::Result<u64> {
		let name_hash = from_utf8(self.get_string(row.name)?);
		let masked = (row.flags & PARAM_SURFACE_FLAGS).bits() as u64;
		let default_hash = match row.flags.contains(ParamAttributes::HAS_DEFAULT) {
			true => self.hash_constant_for(MetadataToken::from(param))?,
			false => OFFSET,
		};
		let attrs_hash = self.custom_attributes_for(MetadataToken::from(param))?;
		Ok(combine5(row.sequence as u64, name_hash, masked, default_hash, attrs_hash))
	}

	fn hash_constant_for(&self, owner: MetadataToken) -> io::Result<u64> {
		let Some(table) = self.constants() else { return Ok(OFFSET) };
		match table.rows().iter().find(|r| MetadataToken::from(r.parent) == owner) {
			Some(row) => Ok(from_bytes(self.get_blob(row.value)?)),
			None => Ok(OFFSET),
		}
	}

	/// A property is only in-surface if at least one of its accessors is -
	/// `Property` rows carry no accessibility of their own, so membership is
	/// derived from `MethodSemantics` plus the accessor-method set
	/// `hash_members` already populated for this type.
	fn hash_properties_for(&mut self, type_rid: usize) -> io::Result<Vec<u64>> {
		let range = self.property_range(type_rid)?;
		let mut hashes = Vec::new();
		for rid in range {
			let row = self.properties().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
			let owner = MetadataToken::from(PropertyToken(rid));
			if !self.accessor_is_in_surface(owner, MethodSemanticsAttributes::GETTER | MethodSemanticsAttributes::SETTER)? {
				continue;
			}
			let name = from_utf8(self.get_string(row.name)?);
			let attrs = self.custom_attributes_for(owner)?;
			hashes.push(combine2(name, attrs));
		}
		Ok(hashes)
	}

	fn hash_events_for(&mut self, type_rid: usize) -> io::Result<Vec<u64>> {
		let range = self.event_range(type_rid)?;
		let mut hashes = Vec::new();
		for rid in range {
			let row = self.events().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
			let owner = MetadataToken::from(EventToken(rid));
			if !self.accessor_is_in_surface(owner, MethodSemanticsAttributes::ADD_ON | MethodSemanticsAttributes::REMOVE_ON)? {
				continue;
			}
			let name = from_utf8(self.get_string(row.name)?);
			let attrs = self.custom_attributes_for(owner)?;
			hashes.push(combine2(name, attrs));
		}
		Ok(hashes)
	}

	fn accessor_is_in_surface(&self, owner: MetadataToken, mask: MethodSemanticsAttributes) -> io::Result<bool> {
		let Some(table) = self.method_semantics() else { return Ok(false) };
		for row in table.rows() {
			if MetadataToken::from(row.association) != owner {
				continue;
			}
			if row.flags.intersects(mask) && self.accessor_methods.contains(&row.method.0) {
				return Ok(true);
			}
		}
		Ok(false)
	}

	fn hash_type_definition_surface(&mut self, rid: usize) -> io::Result<u64> {
		let row = self.type_defs().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
		let masked = (row.flags & TYPE_SURFACE_FLAGS).bits() as u64;
		let ns = from_utf8(self.get_string(row.type_namespace)?);
		let name = from_utf8(self.get_string(row.type_name)?);

		let owner_token = MetadataToken::from(TypeDefToken(rid));
		let generic_hash = self.hash_generic_params_for(owner_token)?;
		let super_hash = self.hash_super_types(rid)?;
		let containing_hash = self.hash_containing_type(rid)?;
		let members_hash = self.hash_members(TypeDefToken(rid))?;
		let attrs_hash = self.custom_attributes_for(owner_token)?;

		Ok(combine(&[masked, ns, name, generic_hash, super_hash, containing_hash, members_hash, attrs_hash]))
	}

	fn hash_exported_type_if_in_surface(&mut self, rid: usize) -> io::Result<Option<u64>> {
		let row = self.exported_types().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
		let code = (row.flags & TypeAttributes::VISIBILITY_MASK).bits();
		let visibility = TypeVisibility::from_masked_code(code).ok_or_else(bad_image)?;
		let name = self.get_string(row.type_name)?;
		if !type_is_in_surface(visibility, name, self.cache.internals_visible()) {
			return Ok(None);
		}

		let ns = from_utf8(self.get_string(row.type_namespace)?);
		let name_hash = from_utf8(name);
		let impl_hash = self.hash_exported_type_implementation(row.implementation)?;
		let attrs_hash = self.custom_attributes_for(MetadataToken::from(ExportedTypeToken(rid)))?;
		Ok(Some(combine4(ns, name_hash, impl_hash, attrs_hash)))
	}

	/// An exported type forwards to another assembly (`AssemblyRef`) or, in a
	/// forwarder chain, to another `ExportedType` row in this one. A
	/// forwarded-to type that turns out not to be in surface contributes
	/// `OFFSET`, same as any other absent member.
	fn hash_exported_type_implementation(&mut self, implementation: Implementation) -> io::Result<u64> {
		let token = MetadataToken::from(implementation);
		match token.kind() {
			MetadataTokenKind::AssemblyRef => {
				let handle = AssemblyRefToken::try_from(implementation).map_err(|_| bad_image())?;
				self.hash_assembly_ref(handle)
			},
			MetadataTokenKind::ExportedType => {
				let handle = ExportedTypeToken::try_from(implementation).map_err(|_| bad_image())?;
				Ok(self.hash_exported_type_if_in_surface(handle.0)?.unwrap_or(OFFSET))
			},
			_ => Err(bad_image()),
		}
	}

	fn hash_manifest_resource_if_in_surface(&mut self, rid: usize) -> io::Result<Option<u64>> {
		let row = self.manifest_resources().ok_or_else(bad_image)?.get(rid).ok_or_else(bad_image)?.clone();
		let is_public = row.flags.contains(ManifestResourceAttributes::PUBLIC);
		let name = self.get_string(row.name)?;
		if !resource_is_in_surface(is_public, name, &self.assembly_name) {
			return Ok(None);
		}

		let body = self.resource_body(&row)?;
		let digest = hash_resource_body(body);
		let attrs_hash = self.custom_attributes_for(MetadataToken::from(ManifestResourceToken(rid)))?;
		Ok(Some(combine2(digest, attrs_hash)))
	}

	/// A resource with a nonzero `implementation` lives in another file or
	/// assembly of a multi-file deployment; reading its bytes would mean
	/// resolving that other file, which is out of scope here, so it
	/// contributes an empty body rather than an error.
	fn resource_body(&self, row: &ManifestResource) -> io::Result<&'a [u8]> {
		if MetadataToken::from(row.implementation).index() != 0 {
			return Ok(&[]);
		}

		let cli_header = self.assembly.cli_header();
		let (section, base) = self.assembly.pe_file().resolve_rva(cli_header.resources.virtual_address).ok_or_else(bad_image)?;
		let start = base.checked_add(row.offset as usize).ok_or_else(bad_image)?;

		let len_end = start.checked_add(4).ok_or_else(bad_image)?;
		let len_bytes: [u8; 4] = section.get(start..len_end).ok_or_else(bad_image)?.try_into().map_err(|_| bad_image())?;
		let len = u32::from_le_bytes(len_bytes) as usize;

		let body_end = len_end.checked_add(len).ok_or_else(bad_image)?;
		section.get(len_end..body_end).ok_or_else(bad_image)
	}

	fn hash_assembly_definition(&mut self) -> io::Result<u64> {
		let Some(table) = self.assemblies() else { return Ok(OFFSET) };
		let Some(row) = table.get(1) else { return Ok(OFFSET) };
		let row = row.clone();
		let name = from_utf8(self.get_string(row.name)?);
		let culture = from_utf8(self.get_string(row.culture)?);
		let key = from_bytes(self.get_blob(row.public_key)?);
		Ok(combine3(name, culture, key))
	}

	fn owning_type_def(&self, method_rid: usize) -> io::Result<Option<TypeDefToken>> {
		let Some(table) = self.type_defs() else { return Ok(None) };
		for rid in 1..=table.rows().len() {
			if self.method_range(rid)?.contains(&method_rid) {
				return Ok(Some(TypeDefToken(rid)));
			}
		}
		Ok(None)
	}

	fn declaring_type_handle_of_ctor(&self, ty: CustomAttributeType) -> io::Result<Option<TypeHandle>> {
		let token = MetadataToken::from(ty);
		match token.kind() {
			MetadataTokenKind::MethodDef => {
				let rid = token_as::<MethodDefToken>(token)?.0;
				Ok(self.owning_type_def(rid)?.map(TypeHandle::TypeDef))
			},
			MetadataTokenKind::MemberRef => {
				let row = self.member_refs().ok_or_else(bad_image)?.get(token_as::<MemberRefToken>(token)?.0).ok_or_else(bad_image)?;
				match type_handle_from_token(MetadataToken::from(row.class)) {
					Ok(handle) => Ok(Some(handle)),
					Err(_) => Ok(None),
				}
			},
			_ => Err(bad_image()),
		}
	}

	/// Resolves and hashes the ctor's declaring type as a side effect (so the
	/// well-known-type registry sees it even if nothing else in the assembly
	/// references that type directly), returning the handle's token for the
	/// ignore-list check in `custom_attributes_for`.
	fn observe_ctor_declaring_type(&mut self, ty: CustomAttributeType) -> io::Result<Option<MetadataToken>> {
		match self.declaring_type_handle_of_ctor(ty)? {
			Some(handle) => {
				self.hash_type_handle_usage(handle)?;
				Ok(Some(type_handle_token(handle)))
			},
			None => Ok(None),
		}
	}

	fn hash_attribute_ctor(&mut self, ty: CustomAttributeType) -> io::Result<u64> {
		let token = MetadataToken::from(ty);
		match token.kind() {
			MetadataTokenKind::MethodDef => self.hash_method_def_usage(token_as(token)?),
			MetadataTokenKind::MemberRef => self.hash_member_ref(token_as(token)?),
			_ => Err(bad_image()),
		}
	}

	fn custom_attributes_for(&mut self, owner: MetadataToken) -> io::Result<u64> {
		let Some(table) = self.custom_attributes() else {
			return Ok(hash_custom_attribute_set(std::iter::empty()));
		};

		let rows: Vec<_> = table.rows().iter().filter(|r| MetadataToken::from(r.parent) == owner).map(|r| (r.ty, r.value)).collect();

		let mut hashes = Vec::with_capacity(rows.len());
		for (ty, value) in rows {
			if !self.options.contains(HashOptions::INCLUDE_ALL_ATTRIBUTES) {
				if let Some(declaring) = self.observe_ctor_declaring_type(ty)? {
					if self.cache.is_ignored_attribute_type(declaring) {
						continue;
					}
				}
			}
			let ctor_hash = self.hash_attribute_ctor(ty)?;
			let blob = self.get_blob(value)?;
			hashes.push(hash_custom_attribute(ctor_hash, blob)?);
		}
		Ok(hash_custom_attribute_set(hashes))
	}

	fn type_namespace_name(&self, handle: TypeHandle) -> io::Result<(&'a str, &'a str)> {
		match handle {
			TypeHandle::TypeDef(t) => {
				let row = self.type_defs().ok_or_else(bad_image)?.get(t.0).ok_or_else(bad_image)?;
				Ok((self.get_string(row.type_namespace)?, self.get_string(row.type_name)?))
			},
			TypeHandle::TypeRef(t) => {
				let row = self.type_refs().ok_or_else(bad_image)?.get(t.0).ok_or_else(bad_image)?;
				Ok((self.get_string(row.type_namespace)?, self.get_string(row.type_name)?))
			},
			// A TypeSpec can't be the declaring type of an attribute ctor in
			// valid metadata; treated as "not InternalsVisibleToAttribute".
			TypeHandle::TypeSpec(_) => Ok(("", "")),
		}
	}

	/// Scans the assembly-level custom attributes for
	/// `InternalsVisibleToAttribute`, gating whether `internal`/`FamANDAssem`
	/// members are ever in-surface. Must run before any surface walk that
	/// consults `HandleCache::internals_visible`.
	fn detect_internals_visible(&mut self) -> io::Result<()> {
		let Some(table) = self.custom_attributes() else { return Ok(()) };
		let owner = MetadataToken::from(AssemblyToken(1));
		let ctors: Vec<_> = table.rows().iter().filter(|r| MetadataToken::from(r.parent) == owner).map(|r| r.ty).collect();

		for ty in ctors {
			let Some(handle) = self.declaring_type_handle_of_ctor(ty)? else { continue };
			let (ns, name) = self.type_namespace_name(handle)?;
			if ns == "System.Runtime.CompilerServices" && name == "InternalsVisibleToAttribute" {
				self.cache.set_internals_visible();
				break;
			}
		}
		Ok(())
	}
}

/// Resolves signature type references to their usage hash - the ordinary
/// case, used everywhere except while computing a struct's own field layout.
struct UsageResolver<'a, 'h> {
	hasher: &'h mut SurfaceHasher<'a>,
}

impl<'a, 'h> SignatureTypeResolver for UsageResolver<'a, 'h> {
	fn hash_type_definition(&mut self, handle: TypeDefToken) -> io::Result<u64> {
		self.hasher.hash_type_definition_usage(handle)
	}
	fn hash_type_reference(&mut self, handle: TypeRefToken) -> io::Result<u64> {
		self.hasher.hash_type_reference(handle)
	}
	fn hash_type_spec(&mut self, handle: TypeSpecToken) -> io::Result<u64> {
		self.hasher.hash_type_spec(handle)
	}
}

/// Resolves a field's own type recursively through other value types defined
/// in this assembly, so a struct's layout hash reflects nested struct
/// layouts rather than just their namespace+name identity. External types
/// (`TypeRef`/`TypeSpec`) fall back to the ordinary usage hash - there's no
/// further metadata to recurse into.
struct StructFieldResolver<'a, 'h> {
	hasher: &'h mut SurfaceHasher<'a>,
}

impl<'a, 'h> SignatureTypeResolver for StructFieldResolver<'a, 'h> {
	fn hash_type_definition(&mut self, handle: TypeDefToken) -> io::Result<u64> {
		self.hasher.struct_field_hash(handle)
	}
	fn hash_type_reference(&mut self, handle: TypeRefToken) -> io::Result<u64> {
		self.hasher.hash_type_reference(handle)
	}
	fn hash_type_spec(&mut self, handle: TypeSpecToken) -> io::Result<u64> {
		self.hasher.hash_type_spec(handle)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn type_handle_from_token_rejects_non_type_kinds() {
		let token = MetadataToken::from(FieldToken(1));
		assert!(type_handle_from_token(token).is_err());
	}

	#[test]
	fn type_handle_from_token_round_trips_each_kind() {
		let def = MetadataToken::from(TypeDefToken(3));
		assert!(matches!(type_handle_from_token(def).unwrap(), TypeHandle::TypeDef(TypeDefToken(3))));

		let r#ref = MetadataToken::from(TypeRefToken(5));
		assert!(matches!(type_handle_from_token(r#ref).unwrap(), TypeHandle::TypeRef(TypeRefToken(5))));

		let spec = MetadataToken::from(TypeSpecToken(7));
		assert!(matches!(type_handle_from_token(spec).unwrap(), TypeHandle::TypeSpec(TypeSpecToken(7))));
	}

	#[test]
	fn token_as_fails_on_kind_mismatch() {
		let token = MetadataToken::from(TypeDefToken(1));
		let result: io::Result<FieldToken> = token_as(token);
		assert!(result.is_err());
	}

	#[test]
	fn bad_image_is_invalid_data() {
		assert_eq!(bad_image().kind(), io::ErrorKind::InvalidData);
	}

	#[test]
	fn surface_flag_masks_cover_the_expected_bits() {
		assert!(TYPE_SURFACE_FLAGS.contains(TypeAttributes::ABSTRACT));
		assert!(TYPE_SURFACE_FLAGS.contains(TypeAttributes::VISIBILITY_MASK));
		assert!(!TYPE_SURFACE_FLAGS.contains(TypeAttributes::BeforeFieldInit));

		assert!(METHOD_SURFACE_FLAGS.contains(MethodAttributes::VIRTUAL));
		assert!(!METHOD_SURFACE_FLAGS.contains(MethodAttributes::PINVOKE_IMPL));

		assert!(PARAM_SURFACE_FLAGS.contains(ParamAttributes::HAS_DEFAULT));
		assert!(!PARAM_SURFACE_FLAGS.contains(ParamAttributes::HAS_FIELD_MARSHAL));
	}
}
