//! Parsing logic for the rowmap derive macros.
//!
//! This module extracts struct-level and field-level `#[rowmap(...)]`
//! attributes from the derive input to build `RecordDef` and `EnumDef`
//! structures used for code generation.

use syn::{Attribute, Data, DeriveInput, Error, Expr, Fields, Generics, Ident, Lit, Result, Type};

/// Parsed struct with `#[derive(Mapped)]` or `#[derive(Params)]`.
#[derive(Debug)]
pub struct RecordDef {
    pub name: Ident,
    pub generics: Generics,
    pub fields: Vec<FieldDef>,
    pub attrs: RecordAttrs,
}

/// Struct-level options.
#[derive(Debug, Default)]
pub struct RecordAttrs {
    /// The struct has no `Default` impl; only the all-fields constructor applies.
    pub no_default: bool,
    /// Always build with `Default` and set members, even when all columns match.
    pub construct_then_set: bool,
    /// Parameters bind in declaration order rather than alphabetically.
    pub positional: bool,
}

/// Parsed named field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    /// Column (or parameter) name: the override, else the field name.
    pub column: String,
    pub ty: Type,
    pub skip: bool,
}

/// Parsed fieldless enum with `#[derive(SqlEnum)]`.
#[derive(Debug)]
pub struct EnumDef {
    pub name: Ident,
    pub variants: Vec<Ident>,
    /// Integer type from `#[repr(..)]`, if any.
    pub repr: Option<Ident>,
}

pub fn parse_record(input: &DeriveInput, derive: &str) -> Result<RecordDef> {
    let name = input.ident.clone();
    let generics = input.generics.clone();
    let attrs = parse_record_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named
                .named
                .iter()
                .map(|field| {
                    let ident = field
                        .ident
                        .clone()
                        .ok_or_else(|| Error::new_spanned(field, "expected a named field"))?;
                    parse_field(ident, field.ty.clone(), &field.attrs)
                })
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(Error::new_spanned(
                    input,
                    format!("{} can only be derived for structs with named fields", derive),
                ));
            }
        },
        Data::Enum(_) | Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                format!("{} can only be derived for structs", derive),
            ));
        }
    };

    Ok(RecordDef {
        name,
        generics,
        fields,
        attrs,
    })
}

fn parse_record_attrs(attrs: &[Attribute]) -> Result<RecordAttrs> {
    let mut result = RecordAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("rowmap") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("no_default") {
                result.no_default = true;
            } else if path.is_ident("construct_then_set") {
                result.construct_then_set = true;
            } else if path.is_ident("positional") {
                result.positional = true;
            } else {
                return Err(meta.error(
                    "unknown rowmap struct attribute; expected one of: no_default, construct_then_set, positional",
                ));
            }
            Ok(())
        })?;
    }

    if result.no_default && result.construct_then_set {
        return Err(Error::new(
            proc_macro2::Span::call_site(),
            "construct_then_set requires a Default impl and cannot be combined with no_default",
        ));
    }

    Ok(result)
}

fn parse_field(name: Ident, ty: Type, attrs: &[Attribute]) -> Result<FieldDef> {
    let mut column: Option<String> = None;
    let mut skip = false;

    for attr in attrs {
        if !attr.path().is_ident("rowmap") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("skip") {
                skip = true;
            } else if path.is_ident("column") || path.is_ident("rename") {
                let value: Lit = meta.value()?.parse()?;
                if let Lit::Str(lit_str) = value {
                    column = Some(lit_str.value());
                } else {
                    return Err(Error::new_spanned(
                        value,
                        "expected string literal for column name",
                    ));
                }
            } else {
                return Err(meta.error(
                    "unknown rowmap field attribute; expected one of: column, rename, skip",
                ));
            }
            Ok(())
        })?;
    }

    let column = column.unwrap_or_else(|| name.unraw_string());

    Ok(FieldDef {
        name,
        column,
        ty,
        skip,
    })
}

pub fn parse_enum(input: &DeriveInput) -> Result<EnumDef> {
    let Data::Enum(data) = &input.data else {
        return Err(Error::new_spanned(
            input,
            "SqlEnum can only be derived for enums",
        ));
    };

    let mut variants = Vec::with_capacity(data.variants.len());
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(Error::new_spanned(
                variant,
                "SqlEnum variants cannot carry data",
            ));
        }
        if let Some((_, Expr::Lit(_) | Expr::Unary(_))) | None = &variant.discriminant {
            variants.push(variant.ident.clone());
        } else {
            return Err(Error::new_spanned(
                variant,
                "SqlEnum discriminants must be integer literals",
            ));
        }
    }

    let mut repr = None;
    for attr in &input.attrs {
        if attr.path().is_ident("repr") {
            attr.parse_nested_meta(|meta| {
                if let Some(ident) = meta.path.get_ident() {
                    repr = Some(ident.clone());
                }
                Ok(())
            })?;
        }
    }

    Ok(EnumDef {
        name: input.ident.clone(),
        variants,
        repr,
    })
}

trait UnrawString {
    fn unraw_string(&self) -> String;
}

impl UnrawString for Ident {
    fn unraw_string(&self) -> String {
        let s = self.to_string();
        s.strip_prefix("r#").map(str::to_string).unwrap_or(s)
    }
}
