use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Error, Result};

/// A comma-separated list of named options, e.g. `#[dynarch(a, b = c)]`.
pub(crate) struct Attr<T> {
    pub(crate) items: Vec<Named<T>>,
}

impl<T> Default for Attr<T> {
    fn default() -> Self { Self { items: Vec::new() } }
}

impl<T> Attr<T>
where
    Named<T>: Parse,
{
    /// Collects the options of every `#[dynarch(...)]` attribute on an item.
    pub(crate) fn collect(attrs: &[syn::Attribute]) -> Result<Self> {
        let mut args = Self::default();
        for attr in attrs {
            if attr.path().is_ident("dynarch") {
                let this_args: Attr<T> = attr.parse_args()?;
                args.items.extend(this_args.items);
            }
        }
        Ok(args)
    }
}

impl<T> Attr<T> {
    /// Finds the only option matching `f`, erroring if it is specified twice.
    pub(crate) fn find_one<U>(
        &self,
        f: impl Fn(&T) -> Option<&U>,
    ) -> Result<Option<(&syn::Ident, &U)>> {
        let mut found = None;
        for item in &self.items {
            if let Some(value) = f(&item.value) {
                if found.is_some() {
                    return Err(Error::new_spanned(
                        &item.name,
                        format!("Option `{}` is specified multiple times", item.name),
                    ));
                }
                found = Some((&item.name, value));
            }
        }
        Ok(found)
    }
}

impl<T> Parse for Attr<T>
where
    Named<T>: Parse,
{
    fn parse(input: ParseStream) -> Result<Self> {
        let items = Punctuated::<Named<T>, syn::Token![,]>::parse_terminated(input)?;
        Ok(Self { items: items.into_iter().collect() })
    }
}

/// An option value with the identifier it was named by.
pub(crate) struct Named<T> {
    pub(crate) name:  syn::Ident,
    pub(crate) value: T,
}

/// The generics of a derive input, split into the parts needed for an impl block.
pub(crate) struct ParsedGenerics {
    pub(crate) ident:  syn::Ident,
    pub(crate) decl:   TokenStream,
    pub(crate) usage:  TokenStream,
    pub(crate) where_: TokenStream,
}

pub(crate) fn parse_generics(input: &syn::DeriveInput) -> ParsedGenerics {
    let generics = &input.generics;

    let (decl, usage) = if generics.params.is_empty() {
        (quote!(), quote!())
    } else {
        let decl: Vec<_> = generics.params.iter().collect();
        let usage: Vec<_> = generics
            .params
            .iter()
            .map(|param| match param {
                syn::GenericParam::Type(syn::TypeParam { ident, .. }) => quote!(#ident),
                syn::GenericParam::Lifetime(syn::LifetimeParam { lifetime, .. }) => {
                    quote!(#lifetime)
                }
                syn::GenericParam::Const(syn::ConstParam { ident, .. }) => quote!(#ident),
            })
            .collect();
        (
            quote_spanned!(generics.span() => <#(#decl),*>),
            quote_spanned!(generics.span() => <#(#usage),*>),
        )
    };

    let where_ = match &generics.where_clause {
        Some(where_) => quote!(#where_),
        None => quote!(),
    };

    ParsedGenerics { ident: input.ident.clone(), decl, usage, where_ }
}

impl ParsedGenerics {
    pub(crate) fn impl_trait(&self, trait_: TokenStream, body: TokenStream) -> TokenStream {
        let Self { ident, decl, usage, where_ } = self;
        quote! {
            impl #decl #trait_ for #ident #usage #where_ {
                #body
            }
        }
    }
}
