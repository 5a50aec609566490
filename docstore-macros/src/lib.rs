//! Procedural macros for the docstore project.
//!
//! `#[derive(Document)]` implements `docstore::document::Document` for a struct with named
//! fields:
//!
//! ```ignore
//! use docstore::{Document, bson::oid::ObjectId};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize, Document)]
//! #[document(collection = "orders")]
//! pub struct Order {
//!     #[document(id)]
//!     #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub sku: String,
//! }
//! ```
//!
//! The identifier field must be an `Option<ObjectId>`. Without a `#[document(id)]` marker a
//! field named `id` is used.

#[allow(unused_extern_crates)]
extern crate self as docstore_macros;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Error, Fields, Ident, LitStr, parse_macro_input};

#[proc_macro_derive(Document, attributes(document))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand_document(input)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}

fn expand_document(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let collection = collection_name(&input)?;
    let id_field = id_field(&input)?;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::docstore::document::Document for #name #ty_generics #where_clause {
            fn collection_name() -> &'static str {
                #collection
            }

            fn id(&self) -> ::core::option::Option<::docstore::bson::oid::ObjectId> {
                self.#id_field
            }

            fn set_id(&mut self, id: ::docstore::bson::oid::ObjectId) {
                self.#id_field = ::core::option::Option::Some(id);
            }
        }
    })
}

fn collection_name(input: &DeriveInput) -> syn::Result<LitStr> {
    let mut collection = None;

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("document")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                collection = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(meta.error("expected `collection = \"...\"`"))
            }
        })?;
    }

    match collection {
        Some(name) if !name.value().is_empty() => Ok(name),
        Some(name) => Err(Error::new_spanned(name, "collection name must not be empty")),
        None => Err(Error::new_spanned(
            &input.ident,
            "missing #[document(collection = \"...\")] attribute",
        )),
    }
}

fn id_field(input: &DeriveInput) -> syn::Result<Ident> {
    let Data::Struct(data) = &input.data else {
        return Err(Error::new_spanned(&input.ident, "Document can only be derived for structs"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(Error::new_spanned(&input.ident, "Document requires named fields"));
    };

    let mut marked = None;
    for field in &fields.named {
        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("document")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    if marked.is_some() {
                        return Err(meta.error("only one field can be marked #[document(id)]"));
                    }
                    marked = field.ident.clone();
                    Ok(())
                } else {
                    Err(meta.error("expected `id`"))
                }
            })?;
        }
    }

    marked
        .or_else(|| {
            fields
                .named
                .iter()
                .filter_map(|field| field.ident.clone())
                .find(|ident| *ident == "id")
        })
        .ok_or_else(|| {
            Error::new_spanned(
                &input.ident,
                "no identifier field: mark an Option<ObjectId> field with #[document(id)]",
            )
        })
}
