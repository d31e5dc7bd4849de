//! Public-API-surface membership predicates (§4.5).
//!
//! These are pure functions over already-decoded flags and names — nothing
//! here touches the metadata tables directly. Nested-type and nested
//! exported-type chain walking (“every enclosing type must also be in
//! surface”) is a table lookup, so that loop lives with the orchestrator in
//! `hash::engine`, which calls [`access_is_in_surface`] once per level.

/// The three-bit accessibility code shared by `FieldAttributes`'
/// `FIELD_ACCESS_MASK` and `MethodAttributes`' `MEMBER_ACCESS_MASK` — both
/// masks use the same numeric encoding, just under different bitflag types.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum MemberAccess {
	CompilerControlled = 0,
	Private = 1,
	FamilyAndAssembly = 2,
	Assembly = 3,
	Family = 4,
	FamilyOrAssembly = 5,
	Public = 6,
}

impl MemberAccess {
	pub fn from_masked_code(code: u16) -> Option<Self> {
		Some(match code {
			0 => Self::CompilerControlled,
			1 => Self::Private,
			2 => Self::FamilyAndAssembly,
			3 => Self::Assembly,
			4 => Self::Family,
			5 => Self::FamilyOrAssembly,
			6 => Self::Public,
			_ => return None,
		})
	}
}

/// §4.5's field/method accessibility rule: always surface for
/// `Public`/`Family`/`FamORAssem`; surface for `Assembly`/`FamANDAssem` only
/// when the assembly grants internals visibility to at least one other
/// assembly.
pub fn access_is_in_surface(access: MemberAccess, internals_visible: bool) -> bool {
	match access {
		MemberAccess::Public | MemberAccess::Family | MemberAccess::FamilyOrAssembly => true,
		MemberAccess::Assembly | MemberAccess::FamilyAndAssembly => internals_visible,
		MemberAccess::CompilerControlled | MemberAccess::Private => false,
	}
}

/// The four-bit type-visibility code from `TypeAttributes::VISIBILITY_MASK`,
/// shared verbatim by `ExportedType.flags`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum TypeVisibility {
	NotPublic = 0,
	Public = 1,
	NestedPublic = 2,
	NestedPrivate = 3,
	NestedFamily = 4,
	NestedAssembly = 5,
	NestedFamilyAndAssembly = 6,
	NestedFamilyOrAssembly = 7,
}

impl TypeVisibility {
	pub fn from_masked_code(code: u32) -> Option<Self> {
		Some(match code {
			0 => Self::NotPublic,
			1 => Self::Public,
			2 => Self::NestedPublic,
			3 => Self::NestedPrivate,
			4 => Self::NestedFamily,
			5 => Self::NestedAssembly,
			6 => Self::NestedFamilyAndAssembly,
			7 => Self::NestedFamilyOrAssembly,
			_ => return None,
		})
	}
}

/// A name starting with `<` is compiler machinery regardless of its nominal
/// visibility — `<Module>`, `<PrivateImplementationDetails>`, C#
/// file-local types like `<Program>$...`. These are excluded from the
/// surface even when `internals_visible` would otherwise admit them.
pub fn name_is_compiler_generated(name: &str) -> bool {
	name.as_bytes().first() == Some(&b'<')
}

/// §4.5's type-definition (and, via the identical `TypeAttributes` shape,
/// exported-type) surface rule. Does not walk the enclosing-type chain for
/// nested types — callers AND this per level themselves.
pub fn type_is_in_surface(visibility: TypeVisibility, name: &str, internals_visible: bool) -> bool {
	use TypeVisibility::*;
	let visible = match visibility {
		Public | NestedPublic | NestedFamily | NestedFamilyOrAssembly => true,
		NotPublic | NestedAssembly | NestedFamilyAndAssembly => internals_visible,
		NestedPrivate => false,
	};
	visible && !name_is_compiler_generated(name)
}

const FSHARP_SIGNATURE_PREFIXES: &[&str] = &["FSharpSignatureInfo.", "FSharpSignatureData.", "FSharpSignatureCompressedData."];

/// §4.5's manifest-resource rule: the resource must be `Public`, and if its
/// name carries one of the F# signature-data prefixes it must also name the
/// current assembly — an F# signature resource embedded for a *different*
/// assembly (multi-assembly F# builds sometimes do this) does not belong to
/// this assembly's surface.
pub fn resource_is_in_surface(is_public: bool, name: &str, current_assembly_name: &str) -> bool {
	if !is_public {
		return false;
	}
	match FSHARP_SIGNATURE_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
		true => name.ends_with(current_assembly_name),
		false => true,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn public_type_is_always_in_surface() {
		assert!(type_is_in_surface(TypeVisibility::Public, "Widget", false));
	}

	#[test]
	fn not_public_requires_internals_visible() {
		assert!(!type_is_in_surface(TypeVisibility::NotPublic, "Widget", false));
		assert!(type_is_in_surface(TypeVisibility::NotPublic, "Widget", true));
	}

	#[test]
	fn compiler_generated_name_is_always_excluded() {
		assert!(!type_is_in_surface(TypeVisibility::Public, "<Module>", true));
		assert!(!type_is_in_surface(TypeVisibility::NotPublic, "<PrivateImplementationDetails>", true));
	}

	#[test]
	fn nested_private_is_never_in_surface() {
		assert!(!type_is_in_surface(TypeVisibility::NestedPrivate, "Inner", true));
	}

	#[test]
	fn assembly_access_gated_by_internals_visible() {
		assert!(!access_is_in_surface(MemberAccess::Assembly, false));
		assert!(access_is_in_surface(MemberAccess::Assembly, true));
		assert!(access_is_in_surface(MemberAccess::Family, false));
	}

	#[test]
	fn fsharp_signature_resource_requires_matching_assembly_name() {
		assert!(resource_is_in_surface(true, "FSharpSignatureData.MyLib", "MyLib"));
		assert!(!resource_is_in_surface(true, "FSharpSignatureData.OtherLib", "MyLib"));
	}

	#[test]
	fn private_resource_is_never_in_surface() {
		assert!(!resource_is_in_surface(false, "SomeResource", "MyLib"));
	}

	#[test]
	fn ordinary_public_resource_is_in_surface() {
		assert!(resource_is_in_surface(true, "icon.png", "MyLib"));
	}
}
