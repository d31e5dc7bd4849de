//! Single-pass ECMA-335 §II.23.2 signature blob decoder.
//!
//! Unlike a typical metadata reader this never materializes a signature AST:
//! each element type is folded into a running `u64` as soon as it is read,
//! via the callback exposed by [`SignatureTypeResolver`]. The resolver is the
//! seam between "what a signature says" (this module) and "how a referenced
//! type contributes to the hash" (the handle cache in `hash::cache`).

use std::io::{Cursor, ErrorKind, Read};

use crate::hash::primitive::{combine2, combine3, combine4, combine_seq};
use crate::metadata::indices::metadata_token::{TypeDefToken, TypeRefToken, TypeSpecToken};
use crate::utilities::read_compressed_u32;

mod element_type {
	pub const VOID: u8 = 0x01;
	pub const BOOLEAN: u8 = 0x02;
	pub const CHAR: u8 = 0x03;
	pub const I1: u8 = 0x04;
	pub const U1: u8 = 0x05;
	pub const I2: u8 = 0x06;
	pub const U2: u8 = 0x07;
	pub const I4: u8 = 0x08;
	pub const U4: u8 = 0x09;
	pub const I8: u8 = 0x0A;
	pub const U8: u8 = 0x0B;
	pub const R4: u8 = 0x0C;
	pub const R8: u8 = 0x0D;
	pub const STRING: u8 = 0x0E;
	pub const PTR: u8 = 0x0F;
	pub const BYREF: u8 = 0x10;
	pub const VALUETYPE: u8 = 0x11;
	pub const CLASS: u8 = 0x12;
	pub const VAR: u8 = 0x13;
	pub const ARRAY: u8 = 0x14;
	pub const GENERICINST: u8 = 0x15;
	pub const TYPEDBYREF: u8 = 0x16;
	pub const I: u8 = 0x18;
	pub const U: u8 = 0x19;
	pub const FNPTR: u8 = 0x1B;
	pub const OBJECT: u8 = 0x1C;
	pub const SZARRAY: u8 = 0x1D;
	pub const MVAR: u8 = 0x1E;
	pub const CMOD_REQD: u8 = 0x1F;
	pub const CMOD_OPT: u8 = 0x20;
	pub const SENTINEL: u8 = 0x41;
	pub const PINNED: u8 = 0x45;
	pub const FIELD: u8 = 0x06;
}

const SIG_CALL_CONV_MASK: u8 = 0x0F;
const SIG_GENERIC: u8 = 0x10;
const SIG_HAS_THIS: u8 = 0x20;
const SIG_EXPLICIT_THIS: u8 = 0x40;

/// Reads an ECMA-335 §II.23.2 compressed *signed* integer, used for array
/// lower bounds. The sign bit is folded into bit 0 after a one-bit rotation
/// of the magnitude, with width (7/14/29 bits) tracking the unsigned form.
fn read_compressed_i32(stream: &mut Cursor<&[u8]>) -> std::io::Result<i32> {
	let mut first = [0u8; 1];
	stream.read_exact(&mut first)?;
	let b0 = first[0];
	let (raw, bits) = if b0 & 0x80 == 0 {
		(b0 as u32, 7u32)
	} else if b0 & 0xC0 == 0x80 {
		let mut rest = [0u8; 1];
		stream.read_exact(&mut rest)?;
		((((b0 & 0x3F) as u32) << 8) | rest[0] as u32, 14)
	} else {
		let mut rest = [0u8; 3];
		stream.read_exact(&mut rest)?;
		((((b0 & 0x1F) as u32) << 24) | ((rest[0] as u32) << 16) | ((rest[1] as u32) << 8) | rest[2] as u32, 29)
	};
	let negative = raw & 1 == 1;
	let magnitude = raw >> 1;
	let value = if negative { -(((1u32 << (bits - 1)) - magnitude) as i32) } else { magnitude as i32 };
	Ok(value)
}

/// A `TypeDefOrRef` coded token as it appears inline in a signature blob
/// (§II.23.2.8): a compressed uint with a 2-bit table tag in the low bits.
#[derive(Debug, Copy, Clone)]
pub enum TypeDefOrRef {
	TypeDef(TypeDefToken),
	TypeRef(TypeRefToken),
	TypeSpec(TypeSpecToken),
}

/// The seam between signature decoding and entity resolution. Implementors
/// own the handle cache and decide whether a referenced type contributes its
/// usage hash or, in struct-layout contexts, its structural field hash.
pub trait SignatureTypeResolver {
	fn hash_type_definition(&mut self, handle: TypeDefToken) -> std::io::Result<u64>;
	fn hash_type_reference(&mut self, handle: TypeRefToken) -> std::io::Result<u64>;
	/// Only called when the signature being decoded permits a `TypeSpec` in
	/// `Class`/`ValueType` position (portable PDB `LocalConstantSig`); any
	/// other context rejects a `TypeSpec` tag as malformed.
	fn hash_type_spec(&mut self, handle: TypeSpecToken) -> std::io::Result<u64>;
}

/// The decoded shape of a method (or property) signature, with enough raw
/// pieces for callers to build either the bare signature hash (§4.3) or the
/// member-identity hash (§4.8), which fold generic parameter count in
/// differently.
pub struct MethodSignature {
	pub return_hash: u64,
	pub param_hashes: Vec<u64>,
	pub generic_param_count: u32,
	pub calling_convention: u8,
	pub has_this: bool,
	pub explicit_this: bool,
}

impl MethodSignature {
	/// `combine(combine_seq(param_hashes), return_hash)` — §4.3's base
	/// method-signature hash.
	pub fn base_hash(&self) -> u64 {
		combine2(combine_seq(self.param_hashes.iter().copied()), self.return_hash)
	}

	/// Base hash with generic-parameter count folded in. Used at usage sites
	/// where a method is identified only by its signature — a `MemberRef` to
	/// another assembly, or a same-assembly `MethodDef` used as an attribute
	/// constructor — and there is no richer per-parameter `GenericParam` row
	/// fold available the way a type definition's own method surface hash
	/// has one; there, the generic-parameter hash already subsumes the count
	/// and this method is not needed.
	pub fn hash_with_generic_count(&self) -> u64 {
		combine3(
			combine_seq(self.param_hashes.iter().copied()),
			self.return_hash,
			self.generic_param_count as u64,
		)
	}
}

/// Decodes signature blobs one element at a time, folding as it goes.
pub struct SignatureReader<'a> {
	stream: Cursor<&'a [u8]>,
	/// Set only for portable-PDB `LocalConstantSig` blobs, where a
	/// `TypeSpec` is permitted to follow a `Class`/`ValueType` tag.
	allow_type_spec: bool,
}

impl<'a> SignatureReader<'a> {
	pub fn new(blob: &'a [u8]) -> Self {
		Self { stream: Cursor::new(blob), allow_type_spec: false }
	}

	pub fn for_local_constant(blob: &'a [u8]) -> Self {
		Self { stream: Cursor::new(blob), allow_type_spec: true }
	}

	fn read_byte(&mut self) -> std::io::Result<u8> {
		let mut b = [0u8; 1];
		self.stream.read_exact(&mut b)?;
		Ok(b[0])
	}

	fn peek_byte(&mut self) -> std::io::Result<u8> {
		let pos = self.stream.position();
		let b = self.read_byte()?;
		self.stream.set_position(pos);
		Ok(b)
	}

	fn read_type_def_or_ref_token(&mut self) -> std::io::Result<TypeDefOrRef> {
		let coded = read_compressed_u32(&mut self.stream)?;
		let tag = coded & 0x3;
		let rid = (coded >> 2) as usize;
		match tag {
			0 => Ok(TypeDefOrRef::TypeDef(TypeDefToken(rid))),
			1 => Ok(TypeDefOrRef::TypeRef(TypeRefToken(rid))),
			2 => Ok(TypeDefOrRef::TypeSpec(TypeSpecToken(rid))),
			_ => Err(ErrorKind::InvalidData.into()),
		}
	}

	fn hash_type_def_or_ref(&mut self, resolver: &mut dyn SignatureTypeResolver) -> std::io::Result<u64> {
		match self.read_type_def_or_ref_token()? {
			TypeDefOrRef::TypeDef(handle) => resolver.hash_type_definition(handle),
			TypeDefOrRef::TypeRef(handle) => resolver.hash_type_reference(handle),
			TypeDefOrRef::TypeSpec(handle) if self.allow_type_spec => resolver.hash_type_spec(handle),
			TypeDefOrRef::TypeSpec(_) => Err(ErrorKind::InvalidData.into()),
		}
	}

	/// Decodes one `Type` production (§II.23.2.12) and folds it into a
	/// single `u64` per the element-type hash table.
	pub fn hash_type(&mut self, resolver: &mut dyn SignatureTypeResolver) -> std::io::Result<u64> {
		let tag = self.read_byte()?;
		match tag {
			element_type::VOID
			| element_type::BOOLEAN
			| element_type::CHAR
			| element_type::I1
			| element_type::U1
			| element_type::I2
			| element_type::U2
			| element_type::I4
			| element_type::U4
			| element_type::I8
			| element_type::U8
			| element_type::R4
			| element_type::R8
			| element_type::STRING
			| element_type::TYPEDBYREF
			| element_type::I
			| element_type::U
			| element_type::OBJECT => Ok(tag as u64),

			element_type::PTR => {
				let inner = self.hash_type(resolver)?;
				Ok(combine2(inner, 3))
			},
			element_type::BYREF => {
				let inner = self.hash_type(resolver)?;
				Ok(combine2(inner, 2))
			},
			element_type::PINNED => {
				let inner = self.hash_type(resolver)?;
				Ok(combine2(inner, 4))
			},
			element_type::SZARRAY => {
				let inner = self.hash_type(resolver)?;
				Ok(combine2(inner, 1))
			},

			element_type::ARRAY => {
				let element = self.hash_type(resolver)?;
				let rank = read_compressed_u32(&mut self.stream)?;

				let num_sizes = read_compressed_u32(&mut self.stream)?;
				let mut sizes = Vec::with_capacity(num_sizes as usize);
				for _ in 0..num_sizes {
					sizes.push(read_compressed_u32(&mut self.stream)? as u64);
				}

				let num_lower_bounds = read_compressed_u32(&mut self.stream)?;
				let mut lower_bounds = Vec::with_capacity(num_lower_bounds as usize);
				for _ in 0..num_lower_bounds {
					lower_bounds.push(read_compressed_i32(&mut self.stream)? as i64 as u64);
				}

				Ok(combine4(element, rank as u64, combine_seq(lower_bounds), combine_seq(sizes)))
			},

			element_type::GENERICINST => {
				// §II.23.2.12: GENERICINST is followed by a mandatory CLASS/VALUETYPE
				// tag before the coded TypeDefOrRef token, unlike a bare Class/ValueType
				// production where that tag *is* the leading byte.
				let kind_tag = self.read_byte()?;
				if kind_tag != element_type::CLASS && kind_tag != element_type::VALUETYPE {
					return Err(ErrorKind::InvalidData.into());
				}
				let element = self.hash_type_def_or_ref(resolver)?;
				let arg_count = read_compressed_u32(&mut self.stream)?;
				let mut args = Vec::with_capacity(arg_count as usize);
				for _ in 0..arg_count {
					args.push(self.hash_type(resolver)?);
				}
				Ok(combine2(element, combine_seq(args)))
			},

			element_type::VAR => {
				let index = read_compressed_u32(&mut self.stream)?;
				Ok(combine2(index as u64, 1000))
			},
			element_type::MVAR => {
				let index = read_compressed_u32(&mut self.stream)?;
				Ok(combine2(index as u64, 1_000_000))
			},

			element_type::CMOD_REQD | element_type::CMOD_OPT => {
				let is_required = tag == element_type::CMOD_REQD;
				let modifier = self.hash_type_def_or_ref(resolver)?;
				let underlying = self.hash_type(resolver)?;
				Ok(combine3(underlying, modifier, if is_required { 42 } else { 0 }))
			},

			element_type::CLASS | element_type::VALUETYPE => self.hash_type_def_or_ref(resolver),

			element_type::FNPTR => {
				let sig = self.method_signature(resolver)?;
				Ok(combine4(
					sig.return_hash,
					combine_seq(sig.param_hashes),
					sig.generic_param_count as u64,
					sig.calling_convention as u64,
				))
			},

			_ => Err(ErrorKind::InvalidData.into()),
		}
	}

	/// Decodes a full `MethodDefSig`/`MethodRefSig` (§II.23.2.1/.2), honoring
	/// a generic-parameter count header and a `Sentinel` vararg boundary.
	pub fn method_signature(&mut self, resolver: &mut dyn SignatureTypeResolver) -> std::io::Result<MethodSignature> {
		let calling_convention_byte = self.read_byte()?;
		let has_this = calling_convention_byte & SIG_HAS_THIS != 0;
		let explicit_this = calling_convention_byte & SIG_EXPLICIT_THIS != 0;
		let calling_convention = calling_convention_byte & SIG_CALL_CONV_MASK;

		let generic_param_count = if calling_convention_byte & SIG_GENERIC != 0 {
			read_compressed_u32(&mut self.stream)?
		} else {
			0
		};

		let param_count = read_compressed_u32(&mut self.stream)?;
		let return_hash = self.hash_type(resolver)?;

		let mut param_hashes = Vec::with_capacity(param_count as usize);
		for _ in 0..param_count {
			if self.peek_byte()? == element_type::SENTINEL {
				self.read_byte()?;
			}
			param_hashes.push(self.hash_type(resolver)?);
		}

		Ok(MethodSignature {
			return_hash,
			param_hashes,
			generic_param_count,
			calling_convention,
			has_this,
			explicit_this,
		})
	}

	/// Decodes a `FieldSig` (§II.23.2.4): the `FIELD` tag followed by a
	/// single, possibly custom-modified, `Type`.
	pub fn field_signature(&mut self, resolver: &mut dyn SignatureTypeResolver) -> std::io::Result<u64> {
		let tag = self.read_byte()?;
		if tag != element_type::FIELD {
			return Err(ErrorKind::InvalidData.into());
		}
		self.hash_type(resolver)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct PanicResolver;
	impl SignatureTypeResolver for PanicResolver {
		fn hash_type_definition(&mut self, _: TypeDefToken) -> std::io::Result<u64> {
			unreachable!()
		}
		fn hash_type_reference(&mut self, _: TypeRefToken) -> std::io::Result<u64> {
			unreachable!()
		}
		fn hash_type_spec(&mut self, _: TypeSpecToken) -> std::io::Result<u64> {
			unreachable!()
		}
	}

	#[test]
	fn primitive_hashes_to_its_element_type_code() {
		let blob = [element_type::I4];
		let mut reader = SignatureReader::new(&blob);
		let mut resolver = PanicResolver;
		assert_eq!(reader.hash_type(&mut resolver).unwrap(), element_type::I4 as u64);
	}

	#[test]
	fn szarray_wraps_element_hash() {
		let blob = [element_type::SZARRAY, element_type::I4];
		let mut reader = SignatureReader::new(&blob);
		let mut resolver = PanicResolver;
		let hash = reader.hash_type(&mut resolver).unwrap();
		assert_eq!(hash, combine2(element_type::I4 as u64, 1));
	}

	#[test]
	fn generic_param_index_is_positional_not_named() {
		let blob = [element_type::VAR, 2];
		let mut reader = SignatureReader::new(&blob);
		let mut resolver = PanicResolver;
		assert_eq!(reader.hash_type(&mut resolver).unwrap(), combine2(2, 1000));
	}

	#[test]
	fn compressed_u32_decodes_two_byte_form() {
		let bytes = [0x80 | 0x01, 0x00];
		let mut cursor = Cursor::new(bytes.as_slice());
		assert_eq!(read_compressed_u32(&mut cursor).unwrap(), 0x100);
	}

	struct StubResolver;
	impl SignatureTypeResolver for StubResolver {
		fn hash_type_definition(&mut self, handle: TypeDefToken) -> std::io::Result<u64> {
			Ok(handle.0 as u64)
		}
		fn hash_type_reference(&mut self, _: TypeRefToken) -> std::io::Result<u64> {
			unreachable!()
		}
		fn hash_type_spec(&mut self, handle: TypeSpecToken) -> std::io::Result<u64> {
			Ok(handle.0 as u64)
		}
	}

	#[test]
	fn generic_inst_consumes_the_class_or_valuetype_tag_before_the_coded_token() {
		// GENERICINST CLASS <TypeDef rid=1> GenArgCount=1 I4
		let coded_type_def_rid_1 = 1u8 << 2; // tag 0 (TypeDef), rid 1
		let blob = [
			element_type::GENERICINST,
			element_type::CLASS,
			coded_type_def_rid_1,
			1,
			element_type::I4,
		];
		let mut reader = SignatureReader::new(&blob);
		let mut resolver = StubResolver;
		let hash = reader.hash_type(&mut resolver).unwrap();
		assert_eq!(hash, combine2(1, combine_seq([element_type::I4 as u64])));
	}

	#[test]
	fn generic_inst_rejects_a_missing_class_or_valuetype_tag() {
		// Malformed: GENERICINST directly followed by a coded token, no kind tag.
		let blob = [element_type::GENERICINST, 1u8 << 2, 0];
		let mut reader = SignatureReader::new(&blob);
		let mut resolver = StubResolver;
		assert!(reader.hash_type(&mut resolver).is_err());
	}

	#[test]
	fn ordinary_reader_rejects_a_type_spec_in_valuetype_position() {
		// VALUETYPE <TypeSpec rid=1>, outside a LocalConstantSig context.
		let coded_type_spec_rid_1 = (1u8 << 2) | 0b10; // tag 2 (TypeSpec), rid 1
		let blob = [element_type::VALUETYPE, coded_type_spec_rid_1];
		let mut reader = SignatureReader::new(&blob);
		let mut resolver = StubResolver;
		assert!(reader.hash_type(&mut resolver).is_err());
	}

	#[test]
	fn local_constant_reader_allows_a_type_spec_in_valuetype_position() {
		// Same blob as above, decoded as a portable-PDB LocalConstantSig,
		// where a TypeSpec is permitted in Class/ValueType position (§II.23.2,
		// LocalConstantSig).
		let coded_type_spec_rid_1 = (1u8 << 2) | 0b10; // tag 2 (TypeSpec), rid 1
		let blob = [element_type::VALUETYPE, coded_type_spec_rid_1];
		let mut reader = SignatureReader::for_local_constant(&blob);
		let mut resolver = StubResolver;
		assert_eq!(reader.hash_type(&mut resolver).unwrap(), 1);
	}
}
