//! This crate contains a single macro [`macro@server_procedure`] for transforming a rust
//! function into a server procedure.

use proc_macro::TokenStream;
use quote::{format_ident, quote, ToTokens};
use syn::spanned::Spanned;
use syn::{parse_macro_input, Error, FnArg, ItemFn, Pat, ReturnType};

/// This macro transforms a function into a type implementing
/// [`doors::server::ServerProcedure`][1]. See the `doors` crate documentation
/// for usage.
///
/// Only single argument functions are supported e.g.
/// ```
/// use doors::server::Request;
/// use doors::server::Response;
///
/// #[door_macros::server_procedure]
/// fn serv_proc(x: Request<'_>) -> Response<Vec<u8>> {
///     todo!();
/// }
/// ```
///
/// [1]: https://docs.rs/doors
#[proc_macro_attribute]
pub fn server_procedure(_attr: TokenStream, item: TokenStream) -> TokenStream {
    // parse the function this attribute was applied to
    let input = parse_macro_input!(item as ItemFn);

    // extract the function name
    let name = format_ident!("{}", input.sig.ident.to_string());

    // check number of arguments, we only support a single argument
    if input.sig.inputs.len() != 1 {
        return Error::new(
            input.sig.inputs.span(),
            "doors should take a single Request as input",
        )
        .to_compile_error()
        .into();
    }

    // extract the single argument and it's type
    let arg = &input.sig.inputs[0];
    let (arg_ident, _arg_type) = match arg {
        FnArg::Receiver(_) => {
            return Error::new(
                arg.span(),
                "only standalone functions supported",
            )
            .to_compile_error()
            .into();
        }

        FnArg::Typed(pt) => {
            let p = match &*pt.pat {
                Pat::Ident(i) => i.ident.to_string(),

                _ => {
                    return Error::new(
                        arg.span(),
                        "only identifier arguments supported",
                    )
                    .to_compile_error()
                    .into()
                }
            };
            (format_ident!("{}", p), *pt.ty.clone())
        }
    };

    //extract the return type
    let return_type = match input.sig.output {
        ReturnType::Default => ReturnType::Default.to_token_stream(),
        ReturnType::Type(_, t) => (*t).to_token_stream(),
    };

    // extract the body of the function
    let blk = input.block;

    // generate a plain fn matching the blanket `ServerProcedure` impl for
    // `Fn(u64, Request<'_>) -> Response<Vec<u8>>`, so the annotated function
    // can be passed directly to `Door::create`.
    let q = quote! {
        fn #name(
            __door_cookie: u64,
            #arg_ident: doors::server::Request<'_>,
        ) -> doors::server::Response<Vec<u8>> {
            let _ = __door_cookie;
            let f = || -> #return_type #blk;
            let response = f();
            let bytes = response
                .data
                .map(|d| d.as_ref().to_vec())
                .unwrap_or_default();
            doors::server::Response::new(bytes)
        }
    };

    TokenStream::from(q)
}
