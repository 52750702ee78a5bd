//! Proc macros for structured generation schemas.
//!
//! Provides `#[derive(OutputSchema)]` to generate the JSON schema a
//! generation result must satisfy, implementing `claude::OutputSchema`.
//!
//! # Example
//!
//! ```ignore
//! /// Decide whether a player's question can be answered
//! #[derive(OutputSchema, Deserialize)]
//! #[schema(name = "judge_question")]
//! struct QuestionJudgement {
//!     /// Is the question reasonable in the current context?
//!     is_reasonable: bool,
//!     /// Names of the entities the question is about
//!     entities: Vec<String>,
//!     /// Why the question is unreasonable, if it is
//!     justification: Option<String>,
//! }
//!
//! /// Coarse message intent
//! #[derive(OutputSchema, Deserialize)]
//! #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
//! enum Intent {
//!     GmRequestInfo,
//!     PerformAction,
//! }
//! ```
//!
//! Unit-only enums become enum-constrained strings. Field types that are not
//! primitives, `Option`, or `Vec` are expected to implement `OutputSchema`
//! themselves and are embedded as nested schemas. Serde `rename` and
//! `rename_all` are honoured so the schema matches what deserializes.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, DeriveInput, Field, Lit, LitStr, Meta, Type};

/// Derive macro for `claude::OutputSchema`.
///
/// # Attributes
///
/// - `#[schema(name = "...")]` - Override the schema/tool name (defaults to snake_case type name)
/// - `#[schema(optional)]` on fields - Mark field as not required
/// - `#[schema(rename = "...")]` on fields - Override field name in schema
#[proc_macro_derive(OutputSchema, attributes(schema))]
pub fn derive_output_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_output_schema(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_output_schema(input: DeriveInput) -> syn::Result<TokenStream2> {
    let type_name = &input.ident;
    let schema_name = schema_name(&input)?;
    let description = doc_comment(&input.attrs).unwrap_or_default();

    let body = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => struct_schema(named.named.iter())?,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "OutputSchema derive only supports structs with named fields",
                ))
            }
        },
        syn::Data::Enum(data) => {
            let rename_all = serde_value(&input.attrs, "rename_all")?;
            let mut names = Vec::new();
            for variant in &data.variants {
                if !matches!(variant.fields, syn::Fields::Unit) {
                    return Err(syn::Error::new_spanned(
                        variant,
                        "OutputSchema derive only supports enums with unit variants",
                    ));
                }
                let name = match serde_value(&variant.attrs, "rename")? {
                    Some(explicit) => explicit,
                    None => apply_rename_rule(&variant.ident.to_string(), rename_all.as_deref()),
                };
                names.push(name);
            }
            quote! {
                serde_json::json!({
                    "type": "string",
                    "enum": [#(#names),*]
                })
            }
        }
        syn::Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                &input,
                "OutputSchema derive does not support unions",
            ))
        }
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics claude::OutputSchema for #type_name #ty_generics #where_clause {
            fn schema_name() -> &'static str {
                #schema_name
            }

            fn schema_description() -> &'static str {
                #description
            }

            fn schema() -> serde_json::Value {
                #body
            }
        }
    })
}

fn struct_schema<'a>(fields: impl Iterator<Item = &'a Field>) -> syn::Result<TokenStream2> {
    let mut inserts = Vec::new();
    let mut required = Vec::new();

    for field in fields {
        let attrs = SchemaAttrs::parse(&field.attrs)?;
        let name = match attrs.rename {
            Some(name) => name,
            None => field_name(field)?,
        };
        let schema = type_to_schema(&field.ty);
        let described = match doc_comment(&field.attrs) {
            Some(doc) => quote! { with_description(#schema, #doc) },
            None => schema,
        };

        inserts.push(quote! { properties.insert(#name.to_string(), #described); });
        if !attrs.optional && !is_option_type(&field.ty) {
            required.push(name);
        }
    }

    Ok(quote! {
        #[allow(dead_code)]
        fn with_description(mut schema: serde_json::Value, doc: &str) -> serde_json::Value {
            if let Some(object) = schema.as_object_mut() {
                object.insert("description".to_string(), serde_json::Value::from(doc));
            }
            schema
        }

        let mut properties = serde_json::Map::new();
        #(#inserts)*
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": [#(#required),*]
        })
    })
}

/// Contents of `#[schema(...)]` on a type or field.
#[derive(Default)]
struct SchemaAttrs {
    name: Option<String>,
    rename: Option<String>,
    optional: bool,
}

impl SchemaAttrs {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut parsed = SchemaAttrs::default();
        for attr in attrs.iter().filter(|a| a.path().is_ident("schema")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    parsed.name = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("rename") {
                    parsed.rename = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("optional") {
                    parsed.optional = true;
                } else {
                    return Err(meta.error("expected `name`, `rename` or `optional`"));
                }
                Ok(())
            })?;
        }
        Ok(parsed)
    }
}

fn schema_name(input: &DeriveInput) -> syn::Result<String> {
    Ok(SchemaAttrs::parse(&input.attrs)?
        .name
        .unwrap_or_else(|| to_snake_case(&input.ident.to_string())))
}

fn field_name(field: &Field) -> syn::Result<String> {
    if let Some(renamed) = serde_value(&field.attrs, "rename")? {
        return Ok(renamed);
    }
    field
        .ident
        .as_ref()
        .map(ToString::to_string)
        .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))
}

/// Look up `key = "value"` inside `#[serde(...)]`, skipping everything else.
fn serde_value(attrs: &[Attribute], key: &str) -> syn::Result<Option<String>> {
    let mut found = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident(key) {
                let value: LitStr = meta.value()?.parse()?;
                found = Some(value.value());
            } else if meta.input.peek(syn::Token![=]) {
                let _: syn::Expr = meta.value()?.parse()?;
            } else if meta.input.peek(syn::token::Paren) {
                let content;
                syn::parenthesized!(content in meta.input);
                let _: TokenStream2 = content.parse()?;
            }
            Ok(())
        })?;
    }
    Ok(found)
}

fn apply_rename_rule(ident: &str, rule: Option<&str>) -> String {
    match rule {
        Some("SCREAMING_SNAKE_CASE") => to_snake_case(ident).to_uppercase(),
        Some("snake_case") => to_snake_case(ident),
        Some("lowercase") => ident.to_lowercase(),
        Some("UPPERCASE") => ident.to_uppercase(),
        _ => ident.to_string(),
    }
}

/// `///` lines joined with spaces, or `None` when there are none.
fn doc_comment(attrs: &[Attribute]) -> Option<String> {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(syn::MetaNameValue {
                value: syn::Expr::Lit(syn::ExprLit { lit: Lit::Str(doc), .. }),
                ..
            }) => Some(doc.value().trim().to_string()),
            _ => None,
        })
        .filter(|line| !line.is_empty())
        .collect();
    (!lines.is_empty()).then(|| lines.join(" "))
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(path) => path.path.segments.last(),
        _ => None,
    }
}

fn is_option_type(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| segment.ident == "Option")
}

fn first_generic_argument(segment: &syn::PathSegment) -> Option<&Type> {
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    })
}

fn type_to_schema(ty: &Type) -> TokenStream2 {
    let any = quote! { serde_json::json!({}) };
    let Some(segment) = last_segment(ty) else {
        return any;
    };

    let primitive = match segment.ident.to_string().as_str() {
        "String" | "str" => Some("string"),
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            Some("integer")
        }
        "f32" | "f64" => Some("number"),
        "bool" => Some("boolean"),
        "Value" => return any,
        "Option" | "Box" => {
            return first_generic_argument(segment).map_or(any, type_to_schema);
        }
        "Vec" => {
            let items = first_generic_argument(segment).map_or(any, type_to_schema);
            return quote! { serde_json::json!({ "type": "array", "items": #items }) };
        }
        _ => None,
    };

    match primitive {
        Some(kind) => quote! { serde_json::json!({ "type": #kind }) },
        // Anything else must describe itself.
        None => quote! { <#ty as claude::OutputSchema>::schema() },
    }
}

fn to_snake_case(ident: &str) -> String {
    let mut snake = String::with_capacity(ident.len() + 4);
    for (i, ch) in ident.char_indices() {
        if ch.is_uppercase() && i > 0 {
            snake.push('_');
        }
        snake.push(ch.to_ascii_lowercase());
    }
    snake
}
