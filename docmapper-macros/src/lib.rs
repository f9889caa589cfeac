//! Procedural macros for the docmapper project.
//!
//! `#[derive(ByExample)]` enumerates the named fields of a struct so a sample
//! value can be turned into equality criteria. Generated code refers to
//! `::docmapper_core`, which must be a dependency of the deriving crate.

use proc_macro::TokenStream;

mod by_example;

/// Derives `docmapper_core::entity::ByExample`.
///
/// Every named field whose serialized value is not null produces one
/// `(field name, value)` pair, in declaration order. Mark a field with
/// `#[example(skip)]` to leave it out entirely.
#[proc_macro_derive(ByExample, attributes(example))]
pub fn derive_by_example(input: TokenStream) -> TokenStream {
    by_example::derive_by_example(input.into()).into()
}
