use proc_macro::TokenStream;

mod event;
mod util;

#[proc_macro_derive(Event, attributes(dynarch))]
pub fn event(input: TokenStream) -> TokenStream {
    event::derive(input.into()).unwrap_or_else(|err| err.to_compile_error()).into()
}
