use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field};

/// Generates a `{Ident}Table` row reader.
///
/// Every field is read through `FromByteStream`, resolving its associated
/// `Deps` value out of the shared `IndexSizes` via `AsRef`, so a single code
/// path covers both fixed-size fields (`Deps = ()`) and heap/coded-index
/// fields (`Deps = IndexSizes`) without per-field-type special casing.
pub fn derive(tokens: proc_macro::TokenStream) -> TokenStream {
	let DeriveInput { ident, data, .. } = syn::parse(tokens).unwrap();

	let data = match data {
		Data::Struct(data) => data,
		Data::Enum(_) => panic!("Enums are not supported"),
		Data::Union(_) => panic!("Unions are not supported"),
	};

	let table = format_ident!("{}Table", ident);
	let reads = data.fields.iter().map(|Field { ident, ty, .. }| {
		quote! {
			#ident: {
				type Deps = <#ty as crate::utilities::FromByteStream>::Deps;
				let deps: &Deps = ::std::convert::AsRef::<Deps>::as_ref(idx_sizes);
				<#ty as crate::utilities::FromByteStream>::read(stream, deps)?
			}
		}
	});

	quote! {
		#[derive(Debug)]
		pub struct #table {
			row_size: usize,
			rows: Vec<#ident>,
		}

		impl #table {
			pub fn read(
				stream: &mut std::io::Cursor<&[u8]>,
				idx_sizes: &crate::metadata::indices::sizes::IndexSizes,
				len: usize,
			) -> std::io::Result<Self> {
				let start = stream.position() as usize;

				let mut rows = Vec::with_capacity(len);
				for _ in 0..len {
					rows.push(#ident { #(#reads),* })
				}

				let row_size = match len {
					0 => 0,
					len => (stream.position() as usize - start) / len,
				};
				Ok(Self { rows, row_size })
			}

			pub fn get(&self, rid: usize) -> Option<&#ident> {
				rid.checked_sub(1).and_then(|i| self.rows.get(i))
			}

			pub fn rows(&self) -> &[#ident] {
				&self.rows
			}
		}

		impl crate::metadata::heaps::table::Table for #table {
			fn len(&self) -> usize {
				self.rows.len()
			}

			fn kind(&self) -> crate::metadata::heaps::table::TableKind {
				crate::metadata::heaps::table::TableKind::#ident
			}

			fn row_size(&self) -> usize {
				self.row_size
			}
		}
	}
}
