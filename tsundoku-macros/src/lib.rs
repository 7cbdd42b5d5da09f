use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse_macro_input, Data, DeriveInput, ImplItem, ImplItemFn, ItemImpl, Stmt,
    Variant, Visibility,
};

/// Turns an enum into a tsundoku error type.
///
/// The annotated enum gets:
/// 1. `#[derive(Debug, thiserror::Error, uniffi::Error)]` and `#[uniffi(flat_error)]`
/// 2. A `Generic { message: String }` variant, unless one is already declared
/// 3. `impl From<anyhow::Error>` which keeps the full cause chain in `message`
/// 4. `from_anyhow_result` helpers
///
/// ```rust,ignore
/// #[tsundoku_error]
/// pub enum MigrationError {
///     #[error("entry {entry_id} not found")]
///     EntryNotFound { entry_id: i64 },
/// }
/// ```
#[proc_macro_attribute]
pub fn tsundoku_error(_args: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(
            &input,
            "tsundoku_error can only be applied to enums",
        )
        .to_compile_error()
        .into();
    };

    let enum_name = &input.ident;
    let visibility = &input.vis;
    let generics = &input.generics;

    // derive/uniffi attributes are re-emitted below
    let attrs: Vec<_> = input
        .attrs
        .iter()
        .filter(|attr| !attr.path().is_ident("derive") && !attr.path().is_ident("uniffi"))
        .collect();

    let mut variants = data_enum.variants.clone();
    if !variants.iter().any(|variant| variant.ident == "Generic") {
        let generic_variant: Variant = syn::parse_quote! {
            /// Any other failure, carrying the rendered cause chain.
            #[error("Generic error: {message}")]
            Generic {
                /// The error message including its causes.
                message: String
            }
        };
        variants.push(generic_variant);
    }

    quote! {
        #[derive(Debug, thiserror::Error, uniffi::Error)]
        #[uniffi(flat_error)]
        #(#attrs)*
        #visibility enum #enum_name #generics {
            #variants
        }

        impl #generics From<anyhow::Error> for #enum_name #generics {
            fn from(err: anyhow::Error) -> Self {
                Self::Generic {
                    message: Self::render_anyhow_chain(&err),
                }
            }
        }

        impl #generics #enum_name #generics {
            /// Converts an `anyhow::Result` into a result with this error type.
            pub fn from_anyhow_result<T>(result: anyhow::Result<T>) -> Result<T, Self> {
                result.map_err(Self::from)
            }

            /// Converts an `anyhow::Result`, prefixing the rendered message.
            pub fn from_anyhow_result_with_prefix<T>(
                result: anyhow::Result<T>,
                prefix: &str,
            ) -> Result<T, Self> {
                result.map_err(|err| Self::Generic {
                    message: format!("{}: {}", prefix, Self::render_anyhow_chain(&err)),
                })
            }

            fn render_anyhow_chain(err: &anyhow::Error) -> String {
                let mut message = err.to_string();
                let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
                if !chain.is_empty() {
                    message.push_str(" (caused by: ");
                    message.push_str(&chain.join(" -> "));
                    message.push(')');
                }
                message
            }
        }
    }
    .into()
}

/// Wraps `#[uniffi::export]` and injects a logging context into exported methods.
///
/// - Forwards the attribute arguments to `#[uniffi::export]`
/// - Inserts `let _tsundoku_logger_ctx = LogContext::new("TypeName");` at the top of
///   every public synchronous method
/// - Adds `async_runtime = "tokio"` when the block has public async methods
///
/// Async methods are left untouched: the context is thread-local and would not follow
/// the future across `.await` points.
///
/// ```rust,ignore
/// #[tsundoku_export]
/// impl MigrationController {
///     pub fn snapshot(&self) -> MigrationSnapshot { /* ... */ }
///     pub async fn start(self: Arc<Self>) -> Result<(), MigrationError> { /* ... */ }
/// }
/// ```
#[proc_macro_attribute]
pub fn tsundoku_export(args: TokenStream, input: TokenStream) -> TokenStream {
    let input_impl = parse_macro_input!(input as ItemImpl);

    let type_name = match &*input_impl.self_ty {
        syn::Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .map_or_else(|| "Unknown".to_string(), |segment| segment.ident.to_string()),
        _ => "Unknown".to_string(),
    };

    let has_async_functions = has_async_functions_in_impl(&input_impl.items);

    let new_items = input_impl
        .items
        .iter()
        .map(|item| match item {
            ImplItem::Fn(method)
                if matches!(method.vis, Visibility::Public(_))
                    && method.sig.asyncness.is_none() =>
            {
                let mut new_method = method.clone();
                inject_logging_context(&mut new_method, &type_name);
                ImplItem::Fn(new_method)
            }
            other => other.clone(),
        })
        .collect();

    let new_impl = ItemImpl {
        items: new_items,
        ..input_impl
    };

    let mut args = proc_macro2::TokenStream::from(args);
    if has_async_functions {
        args = if args.is_empty() {
            quote! { async_runtime = "tokio" }
        } else {
            quote! { #args, async_runtime = "tokio" }
        };
    }

    quote! {
        #[uniffi::export(#args)]
        #new_impl
    }
    .into()
}

fn has_async_functions_in_impl(impl_items: &[ImplItem]) -> bool {
    impl_items.iter().any(|item| {
        if let ImplItem::Fn(method) = item {
            matches!(method.vis, Visibility::Public(_))
                && method.sig.asyncness.is_some()
        } else {
            false
        }
    })
}

fn inject_logging_context(method: &mut ImplItemFn, type_name: &str) {
    let context_stmt: Stmt = syn::parse_quote! {
        let _tsundoku_logger_ctx = crate::primitives::logger::LogContext::new(#type_name);
    };
    method.block.stmts.insert(0, context_stmt);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_detection_with_async_functions() {
        let impl_block: ItemImpl = syn::parse_quote! {
            impl MigrationController {
                pub fn snapshot(&self) -> u32 {
                    0
                }

                pub async fn start(&self) {}
            }
        };

        assert!(has_async_functions_in_impl(&impl_block.items));
    }

    #[test]
    fn test_async_detection_ignores_private_async_functions() {
        let impl_block: ItemImpl = syn::parse_quote! {
            impl MigrationController {
                pub fn snapshot(&self) -> u32 {
                    0
                }

                async fn run_search_pass(&self) {}
            }
        };

        assert!(!has_async_functions_in_impl(&impl_block.items));
    }

    #[test]
    fn test_context_injected_as_first_statement() {
        let mut method: ImplItemFn = syn::parse_quote! {
            pub fn remove_entry(&self, entry_id: i64) -> bool {
                entry_id > 0
            }
        };

        inject_logging_context(&mut method, "MigrationController");

        assert_eq!(method.block.stmts.len(), 2);
        let first = &method.block.stmts[0];
        let rendered = quote!(#first).to_string();
        assert!(rendered.contains("_tsundoku_logger_ctx"));
        assert!(rendered.contains("\"MigrationController\""));
    }
}
