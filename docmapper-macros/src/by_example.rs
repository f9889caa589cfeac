use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Error, Field, Fields};

pub fn derive_by_example(input: TokenStream) -> TokenStream {
    let input: DeriveInput = match syn::parse2(input) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = if let Data::Struct(data) = &input.data {
        if let Fields::Named(named) = &data.fields {
            &named.named
        } else {
            let err = Error::new_spanned(
                &data.fields,
                "ByExample can only be derived for structs with named fields",
            );
            return err.to_compile_error();
        }
    } else {
        let err = Error::new_spanned(
            &input.ident,
            "ByExample can only be derived for structs with named fields",
        );
        return err.to_compile_error();
    };

    let mut pushes = Vec::new();
    for field in fields {
        match is_skipped(field) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => return err.to_compile_error(),
        }

        let Some(field_ident) = field.ident.as_ref() else {
            continue;
        };
        let field_name = field_ident.to_string();
        let field_name = field_name.trim_start_matches("r#");

        pushes.push(quote! {
            if let ::std::option::Option::Some(value) =
                ::docmapper_core::entity::example_value(&self.#field_ident)?
            {
                criteria.push((#field_name, value));
            }
        });
    }

    quote! {
        impl #impl_generics ::docmapper_core::entity::ByExample for #ident #ty_generics #where_clause {
            fn example_criteria(
                &self,
            ) -> ::docmapper_core::error::DataAccessResult<
                ::std::vec::Vec<(&'static str, ::docmapper_core::bson::Bson)>,
            > {
                let mut criteria = ::std::vec::Vec::new();
                #(#pushes)*
                ::std::result::Result::Ok(criteria)
            }
        }
    }
}

// #[example(skip)]
fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;

    for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("example")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported example attribute, expected `skip`"))
            }
        })?;
    }

    Ok(skip)
}
