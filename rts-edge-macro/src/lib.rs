//! The `#[edge_function]` attribute macro.
//!
//! Turns a plain async handler into an `EdgeFunction` that the dev server can
//! mount at the path declared in the attribute.
//!
//! # Example
//!
//! ```ignore
//! use rts_edge::prelude::*;
//!
//! #[edge_function(id = "hello", method = "GET", path = "/api/hello")]
//! async fn hello(req: EdgeRequest, ctx: &FunctionContext) -> Result<EdgeResponse, EdgeError> {
//!     Ok(EdgeResponse::text("hello"))
//! }
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, punctuated::Punctuated, Expr, ExprLit, ItemFn, Lit, Meta, Token};

#[derive(Default, Debug)]
struct EdgeFunctionAttrs {
    id: Option<String>,
    method: Option<String>,
    path: Option<String>,
    description: Option<String>,
}

impl EdgeFunctionAttrs {
    fn parse_meta_list(metas: Punctuated<Meta, Token![,]>) -> syn::Result<Self> {
        let mut attrs = EdgeFunctionAttrs::default();

        for meta in metas {
            let nv = match meta {
                Meta::NameValue(nv) => nv,
                other => return Err(syn::Error::new_spanned(other, "expected name = value")),
            };

            let ident = nv
                .path
                .get_ident()
                .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected identifier"))?
                .to_string();

            let value = match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(lit_str),
                    ..
                }) => lit_str.value(),
                _ => return Err(syn::Error::new_spanned(&nv.value, "expected string literal")),
            };

            let slot = match ident.as_str() {
                "id" => &mut attrs.id,
                "method" => &mut attrs.method,
                "path" => &mut attrs.path,
                "description" => &mut attrs.description,
                _ => {
                    return Err(syn::Error::new_spanned(
                        nv.path,
                        format!("unknown attribute: {}", ident),
                    ))
                }
            };
            *slot = Some(value);
        }

        Ok(attrs)
    }
}

/// Declare an edge function.
///
/// # Attributes
///
/// - `id` (required): function name, also reported by `EdgeFunction::name`
/// - `path` (required): path the dev server mounts the function at
/// - `method` (optional): documented HTTP method (default: "GET")
/// - `description` (optional)
///
/// The handler must be `async fn(EdgeRequest, &FunctionContext) ->
/// Result<EdgeResponse, EdgeError>`. It is kept as written; the macro adds a
/// `<Name>Function` unit struct implementing `EdgeFunction` and a
/// `<NAME>_MANIFEST` static.
#[proc_macro_attribute]
pub fn edge_function(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args with Punctuated::<Meta, Token![,]>::parse_terminated);
    let input_fn = parse_macro_input!(input as ItemFn);

    match generate_edge_function(args, input_fn) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate_edge_function(
    args: Punctuated<Meta, Token![,]>,
    input_fn: ItemFn,
) -> syn::Result<proc_macro2::TokenStream> {
    let attrs = EdgeFunctionAttrs::parse_meta_list(args)?;

    let function_id = attrs.id.ok_or_else(|| {
        syn::Error::new(
            proc_macro2::Span::call_site(),
            "missing required attribute: id",
        )
    })?;
    let path = attrs.path.ok_or_else(|| {
        syn::Error::new(
            proc_macro2::Span::call_site(),
            "missing required attribute: path",
        )
    })?;
    let method = attrs.method.unwrap_or_else(|| "GET".to_string()).to_uppercase();
    let description = attrs.description.unwrap_or_default();

    if input_fn.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            &input_fn.sig,
            "edge_function must be async",
        ));
    }
    if input_fn.sig.inputs.len() != 2 {
        return Err(syn::Error::new_spanned(
            &input_fn.sig.inputs,
            "edge_function takes (EdgeRequest, &FunctionContext)",
        ));
    }

    let fn_name = &input_fn.sig.ident;
    let fn_vis = &input_fn.vis;
    let struct_name = format_ident!("{}Function", to_pascal_case(&fn_name.to_string()));
    let manifest_name = format_ident!("{}_MANIFEST", fn_name.to_string().to_uppercase());

    Ok(quote! {
        #input_fn

        #[allow(dead_code)]
        #fn_vis static #manifest_name: ::rts_edge::function::FunctionManifest =
            ::rts_edge::function::FunctionManifest {
                id: #function_id,
                method: #method,
                path: #path,
                description: #description,
            };

        #[derive(Debug, Default, Clone, Copy)]
        #fn_vis struct #struct_name;

        impl #struct_name {
            pub fn new() -> Self {
                Self
            }

            pub fn manifest() -> &'static ::rts_edge::function::FunctionManifest {
                &#manifest_name
            }
        }

        #[::rts_edge::async_trait]
        impl ::rts_edge::function::EdgeFunction for #struct_name {
            async fn fetch(
                &self,
                request: ::rts_edge::http::EdgeRequest,
                ctx: &::rts_edge::function::FunctionContext,
            ) -> ::std::result::Result<::rts_edge::http::EdgeResponse, ::rts_edge::function::EdgeError> {
                #fn_name(request, ctx).await
            }

            fn name(&self) -> &str {
                #function_id
            }
        }
    })
}

/// snake_case to PascalCase.
fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tokens: proc_macro2::TokenStream) -> syn::Result<EdgeFunctionAttrs> {
        let metas = syn::parse::Parser::parse2(
            Punctuated::<Meta, Token![,]>::parse_terminated,
            tokens,
        )?;
        EdgeFunctionAttrs::parse_meta_list(metas)
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(to_pascal_case("hello"), "Hello");
        assert_eq!(to_pascal_case("rts_test_handler"), "RtsTestHandler");
    }

    #[test]
    fn test_parse_attributes() {
        let attrs = parse(quote!(id = "hello", method = "get", path = "/api/hello")).unwrap();
        assert_eq!(attrs.id.as_deref(), Some("hello"));
        assert_eq!(attrs.method.as_deref(), Some("get"));
        assert_eq!(attrs.path.as_deref(), Some("/api/hello"));
        assert_eq!(attrs.description, None);
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let err = parse(quote!(id = "hello", timeout = "30")).unwrap_err();
        assert!(err.to_string().contains("unknown attribute: timeout"));
    }

    #[test]
    fn test_missing_path_rejected() {
        let args = syn::parse::Parser::parse2(
            Punctuated::<Meta, Token![,]>::parse_terminated,
            quote!(id = "hello"),
        )
        .unwrap();
        let input: ItemFn = syn::parse2(quote! {
            async fn hello(req: EdgeRequest, ctx: &FunctionContext) -> Result<EdgeResponse, EdgeError> {
                todo!()
            }
        })
        .unwrap();
        let err = generate_edge_function(args, input).unwrap_err();
        assert!(err.to_string().contains("path"));
    }
}
