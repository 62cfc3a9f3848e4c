use matches2::option_match;
use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Error, Result};

use crate::util::{self, Attr, Named};

pub(crate) fn derive(input: TokenStream) -> Result<TokenStream> {
    let input: syn::DeriveInput = syn::parse2(input)?;

    if let syn::Data::Union(item) = &input.data {
        return Err(Error::new_spanned(item.union_token, "Event cannot be derived for unions"));
    }

    let args: Attr<ItemOpt> = Attr::collect(&input.attrs)?;

    let crate_name = args
        .find_one(|opt| option_match!(opt, ItemOpt::DynarchAs(crate_name) => crate_name))?
        .map_or_else(|| quote!(::dynarch), |(_, crate_name)| crate_name.clone());

    let name_fn = args
        .find_one(|opt| option_match!(opt, ItemOpt::Name(name) => name))?
        .map(|(_, name)| quote!(fn name() -> &'static str { #name }));

    let generics = util::parse_generics(&input);
    let output = generics.impl_trait(quote!(#crate_name::Event), quote!(#name_fn));

    Ok(output)
}

enum ItemOpt {
    DynarchAs(TokenStream),
    Name(syn::LitStr),
}

impl Parse for Named<ItemOpt> {
    fn parse(input: ParseStream) -> Result<Self> {
        let name = input.parse::<syn::Ident>()?;

        let value = match name.to_string().as_str() {
            "dynarch_as" => {
                let inner;
                let paren = syn::parenthesized!(inner in input);
                let args: TokenStream = inner.parse()?;
                if args.is_empty() {
                    return Err(Error::new(paren.span.join(), "`dynarch_as` expects a path"));
                }
                ItemOpt::DynarchAs(args)
            }
            "name" => {
                let _: syn::Token![=] = input.parse()?;
                let lit: syn::LitStr = input.parse()?;
                if lit.value().is_empty() {
                    return Err(Error::new_spanned(&lit, "Event name cannot be empty"));
                }
                ItemOpt::Name(lit)
            }
            _ => return Err(Error::new_spanned(&name, format!("Unknown argument `{}`", name))),
        };

        Ok(Named { name, value })
    }
}
