//! Procedural macros for rowmap.
//!
//! `rowmap-macros` is the **compile-time metadata layer**. It turns plain
//! structs and enums into types the mapper can materialize rows into and bind
//! parameters from, without any runtime reflection.
//!
//! # Role In The Architecture
//!
//! - **Row targets**: `#[derive(Mapped)]` produces a `TypeMap` with one member
//!   per field, an all-fields constructor and (optionally) a default constructor.
//! - **Parameter objects**: `#[derive(Params)]` produces a `ParamMap` with one
//!   member per field.
//! - **Enums**: `#[derive(SqlEnum)]` binds fieldless enums as integers and
//!   reads them back from integers or variant names.
//!
//! These macros are used by application crates via the `rowmap` facade.

use proc_macro::TokenStream;
use quote::quote;

mod parse;

use parse::{EnumDef, RecordDef, parse_enum, parse_record};

/// Derive macro for the `Mapped` trait.
///
/// Every field becomes a settable member read from the column of the same
/// name (matched case-insensitively). The generated `TypeMap` also carries:
///
/// - an all-fields constructor, used when the columns cover exactly the
///   non-skipped fields
/// - `<Self as Default>::default` as the default constructor, used with the
///   member setters otherwise
///
/// # Attributes
///
/// - `#[rowmap(column = "Name")]` - Read this field from another column
/// - `#[rowmap(skip)]` - Never bind this field; it takes its `Default` value
/// - `#[rowmap(no_default)]` - The struct has no `Default` impl
/// - `#[rowmap(construct_then_set)]` - Always default-construct then set members
///
/// # Example
///
/// ```ignore
/// use rowmap::Mapped;
///
/// #[derive(Mapped, Default)]
/// struct Post {
///     id: i64,
///     #[rowmap(column = "Title")]
///     heading: String,
///     owner_id: Option<i64>,
/// }
/// ```
#[proc_macro_derive(Mapped, attributes(rowmap))]
pub fn derive_mapped(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let def = match parse_record(&input, "Mapped") {
        Ok(d) => d,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_mapped_impl(&def).into()
}

fn generate_mapped_impl(def: &RecordDef) -> proc_macro2::TokenStream {
    let name = &def.name;
    let (impl_generics, ty_generics, where_clause) = def.generics.split_for_impl();

    let bound: Vec<_> = def.fields.iter().filter(|f| !f.skip).collect();
    let skipped: Vec<_> = def.fields.iter().filter(|f| f.skip).map(|f| &f.name).collect();

    let members = bound.iter().map(|field| {
        let ident = &field.name;
        let ty = &field.ty;
        let member_name = ident.to_string();
        let member_name = member_name.strip_prefix("r#").unwrap_or(&member_name);
        let column = &field.column;
        let with_column = if column == member_name {
            quote! {}
        } else {
            quote! { .with_column(#column) }
        };
        quote! {
            .push_member(
                ::rowmap_core::MemberMap::<Self>::new::<#ty>(#member_name, |target, value| {
                    target.#ident = value;
                })
                #with_column
            )
        }
    });

    let ctor_params = bound.iter().map(|f| &f.column);
    let ctor_fields = bound.iter().map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        quote! { #ident: args.take::<#ty>()? }
    });

    let default_ctor = if def.attrs.no_default {
        quote! {}
    } else {
        quote! { .default_constructor(<Self as ::core::default::Default>::default) }
    };

    let construct_then_set = if def.attrs.construct_then_set {
        quote! { .construct_then_set() }
    } else {
        quote! {}
    };

    quote! {
        impl #impl_generics ::rowmap_core::Mapped for #name #ty_generics #where_clause {
            fn mapping() -> ::rowmap_core::Mapping<Self> {
                ::rowmap_core::Mapping::Record(
                    ::rowmap_core::TypeMap::<Self>::new()
                        #(#members)*
                        .constructor(&[#(#ctor_params),*], |args| {
                            ::core::result::Result::Ok(Self {
                                #(#ctor_fields,)*
                                #(#skipped: ::core::default::Default::default(),)*
                            })
                        })
                        #default_ctor
                        #construct_then_set
                )
            }
        }
    }
}

/// Derive macro for the `ToParams` trait.
///
/// Every field becomes a parameter named after the field. Members bind
/// alphabetically unless the struct asks for declaration order.
///
/// # Attributes
///
/// - `#[rowmap(rename = "Name")]` - Bind this field under another name
/// - `#[rowmap(skip)]` - Never bind this field
/// - `#[rowmap(positional)]` - Bind members in declaration order
///
/// # Example
///
/// ```ignore
/// use rowmap::Params;
///
/// #[derive(Params)]
/// struct ByOwner {
///     owner_id: i64,
///     tags: Vec<String>,
/// }
/// ```
#[proc_macro_derive(Params, attributes(rowmap))]
pub fn derive_params(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let def = match parse_record(&input, "Params") {
        Ok(d) => d,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_params_impl(&def).into()
}

fn generate_params_impl(def: &RecordDef) -> proc_macro2::TokenStream {
    let name = &def.name;
    let (impl_generics, ty_generics, where_clause) = def.generics.split_for_impl();

    let bound: Vec<_> = def.fields.iter().filter(|f| !f.skip).collect();

    let members = bound.iter().map(|field| {
        let ident = &field.name;
        let ty = &field.ty;
        let param_name = &field.column;
        quote! {
            .push_member(::rowmap_core::ParamMember::<Self>::new::<#ty>(#param_name, |source| &source.#ident))
        }
    });

    let positional = if def.attrs.positional {
        let names = bound.iter().map(|f| &f.column);
        quote! { .constructor(&[#(#names),*]) }
    } else {
        quote! {}
    };

    quote! {
        impl #impl_generics ::rowmap_core::ToParams for #name #ty_generics #where_clause {
            fn param_map() -> ::rowmap_core::ParamMap<Self> {
                ::rowmap_core::ParamMap::<Self>::new()
                    #(#members)*
                    #positional
            }
        }
    }
}

/// Derive macro for fieldless enums stored as integers.
///
/// Generates `FromValue`, `ToParam`, `ListElement`, `TypeInfo` and `Mapped`.
/// The enum binds as its discriminant, typed after `#[repr(..)]` (32-bit by
/// default). Reading accepts the discriminant or a variant name, ignoring
/// case.
///
/// # Example
///
/// ```ignore
/// #[derive(SqlEnum, Debug, Clone, Copy, PartialEq)]
/// #[repr(u8)]
/// enum Status {
///     Active = 1,
///     Retired = 2,
/// }
/// ```
#[proc_macro_derive(SqlEnum, attributes(rowmap))]
pub fn derive_sql_enum(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let def = match parse_enum(&input) {
        Ok(d) => d,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_sql_enum_impl(&def, &input.generics).into()
}

/// Storage type and declared db type for an enum repr.
fn enum_storage(repr: Option<&syn::Ident>) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    let name = repr.map(ToString::to_string);
    match name.as_deref() {
        Some("i8") => (quote! { i8 }, quote! { SByte }),
        Some("u8") => (quote! { u8 }, quote! { Byte }),
        Some("i16") => (quote! { i16 }, quote! { Int16 }),
        Some("u16") => (quote! { u16 }, quote! { UInt16 }),
        Some("u32") => (quote! { u32 }, quote! { UInt32 }),
        Some("i64" | "u64" | "isize" | "usize") => (quote! { i64 }, quote! { Int64 }),
        _ => (quote! { i32 }, quote! { Int32 }),
    }
}

fn generate_sql_enum_impl(def: &EnumDef, generics: &syn::Generics) -> proc_macro2::TokenStream {
    let name = &def.name;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let (storage, db_type) = enum_storage(def.repr.as_ref());
    let type_name = name.to_string();

    let variants = &def.variants;
    let variant_names: Vec<_> = variants.iter().map(ToString::to_string).collect();

    quote! {
        impl #impl_generics ::rowmap_core::FromValue for #name #ty_generics #where_clause {
            fn from_value(value: &::rowmap_core::Value) -> ::rowmap_core::Result<Self> {
                if let ::rowmap_core::Value::Text(text) = value {
                    let text = text.trim();
                    #(
                        if text.eq_ignore_ascii_case(#variant_names) {
                            return ::core::result::Result::Ok(Self::#variants);
                        }
                    )*
                }
                let number = <i64 as ::rowmap_core::FromValue>::from_value(value)?;
                #(
                    if number == Self::#variants as i64 {
                        return ::core::result::Result::Ok(Self::#variants);
                    }
                )*
                ::core::result::Result::Err(::rowmap_core::Error::Type(::rowmap_core::TypeError {
                    expected: #type_name,
                    actual: ::std::format!("{} matches no variant", value),
                    column: ::core::option::Option::None,
                    rust_type: ::core::option::Option::Some(::core::any::type_name::<Self>()),
                }))
            }
        }

        impl #impl_generics ::rowmap_core::TypeInfo for #name #ty_generics #where_clause {
            const DB_TYPE: ::rowmap_core::DbType = ::rowmap_core::DbType::#db_type;
        }

        impl #impl_generics #name #ty_generics #where_clause {
            #[doc(hidden)]
            fn __rowmap_discriminant(&self) -> ::rowmap_core::Value {
                let number: i64 = match self {
                    #(Self::#variants => Self::#variants as i64,)*
                };
                ::rowmap_core::Value::from(number as #storage)
            }
        }

        impl #impl_generics ::rowmap_core::ToParam for #name #ty_generics #where_clause {
            fn param_kind() -> ::rowmap_core::ParamKind {
                ::rowmap_core::ParamKind::Scalar(<Self as ::rowmap_core::TypeInfo>::DB_TYPE)
            }

            fn to_param(&self) -> ::rowmap_core::ParamValue<'_> {
                ::rowmap_core::ParamValue::Value(self.__rowmap_discriminant())
            }
        }

        impl #impl_generics ::rowmap_core::ListElement for #name #ty_generics #where_clause {
            fn to_list_value(&self) -> ::rowmap_core::Value {
                self.__rowmap_discriminant()
            }
        }

        impl #impl_generics ::rowmap_core::Mapped for #name #ty_generics #where_clause {
            fn mapping() -> ::rowmap_core::Mapping<Self> {
                ::rowmap_core::Mapping::Scalar(::rowmap_core::ScalarMap::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn render(tokens: proc_macro2::TokenStream) -> String {
        tokens.to_string().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_mapped_emits_override_and_default() {
        let input: syn::DeriveInput = parse_quote! {
            struct Post {
                id: i64,
                #[rowmap(column = "Title")]
                heading: String,
                #[rowmap(skip)]
                cache: Vec<u8>,
            }
        };
        let def = parse_record(&input, "Mapped").unwrap();
        let out = render(generate_mapped_impl(&def));
        assert!(out.contains(". with_column (\"Title\")"));
        assert!(out.contains("& [\"id\" , \"Title\"]"));
        assert!(out.contains("cache : :: core :: default :: Default :: default ()"));
        assert!(out.contains("default_constructor"));
        assert!(!out.contains("construct_then_set"));
    }

    #[test]
    fn test_mapped_no_default() {
        let input: syn::DeriveInput = parse_quote! {
            #[rowmap(no_default)]
            struct Pair { a: i32, b: i32 }
        };
        let def = parse_record(&input, "Mapped").unwrap();
        let out = render(generate_mapped_impl(&def));
        assert!(!out.contains("default_constructor"));
    }

    #[test]
    fn test_params_positional_order() {
        let input: syn::DeriveInput = parse_quote! {
            #[rowmap(positional)]
            struct Args {
                zeta: i32,
                #[rowmap(rename = "Alpha")]
                alpha: String,
            }
        };
        let def = parse_record(&input, "Params").unwrap();
        let out = render(generate_params_impl(&def));
        assert!(out.contains(". constructor (& [\"zeta\" , \"Alpha\"])"));
    }

    #[test]
    fn test_enum_storage_follows_repr() {
        let input: syn::DeriveInput = parse_quote! {
            #[repr(u8)]
            enum Status { Active = 1, Retired = 2 }
        };
        let def = parse_enum(&input).unwrap();
        let out = render(generate_sql_enum_impl(&def, &input.generics));
        assert!(out.contains("DbType :: Byte"));
        assert!(out.contains("number as u8"));
    }
}
