use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{
    Attribute, FnArg, ItemTrait, LitBool, LitInt, LitStr, Pat, PatIdent, TraitItem, TraitItemFn,
    parse_macro_input, spanned::Spanned,
};

#[proc_macro_attribute]
pub fn mapper(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut default_collection: Option<LitStr> = None;
    let attr_parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("collection") {
            default_collection = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported mapper attribute, expected `collection = \"...\"`"))
        }
    });
    parse_macro_input!(attr with attr_parser);

    let mut item_trait = parse_macro_input!(item as ItemTrait);
    match expand(default_collection, &mut item_trait) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

enum Template {
    Native(LitStr),
    Sql(LitStr),
    NativeFile(LitStr),
    SqlFile(LitStr),
}

#[derive(Default)]
struct QueryArgs {
    template: Option<Template>,
    kind: Option<LitStr>,
    collection: Option<LitStr>,
    paginated: bool,
    page_size: Option<LitInt>,
    offset: Option<LitInt>,
    sort: Option<LitStr>,
    highlight: Option<LitStr>,
    timeout_ms: Option<LitInt>,
}

impl QueryArgs {
    fn parse(attr: &Attribute) -> syn::Result<Self> {
        let mut args = QueryArgs::default();
        attr.parse_nested_meta(|meta| {
            let template = if meta.path.is_ident("native") {
                Some(Template::Native(meta.value()?.parse()?))
            } else if meta.path.is_ident("sql") {
                Some(Template::Sql(meta.value()?.parse()?))
            } else if meta.path.is_ident("native_file") {
                Some(Template::NativeFile(meta.value()?.parse()?))
            } else if meta.path.is_ident("sql_file") {
                Some(Template::SqlFile(meta.value()?.parse()?))
            } else {
                None
            };
            if let Some(template) = template {
                if args.template.is_some() {
                    return Err(meta.error("only one of native, sql, native_file, sql_file may be set"));
                }
                args.template = Some(template);
                Ok(())
            } else if meta.path.is_ident("kind") {
                args.kind = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("collection") {
                args.collection = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("paginated") {
                // 支持 `paginated` 和 `paginated = true` 两种写法
                args.paginated = if meta.input.peek(syn::Token![=]) {
                    meta.value()?.parse::<LitBool>()?.value
                } else {
                    true
                };
                Ok(())
            } else if meta.path.is_ident("page_size") {
                args.page_size = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("offset") {
                args.offset = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("sort") {
                args.sort = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("highlight") {
                args.highlight = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("timeout_ms") {
                args.timeout_ms = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("unsupported query attribute"))
            }
        })?;
        if args.template.is_none() {
            return Err(syn::Error::new(
                attr.span(),
                "query needs one of native, sql, native_file, sql_file",
            ));
        }
        Ok(args)
    }

    fn kind(&self) -> syn::Result<(TokenStream2, &'static str)> {
        let Some(kind) = &self.kind else {
            return Ok((quote!(::es_mapper::OperationKind::Search), "search"));
        };
        match kind.value().to_ascii_lowercase().as_str() {
            "search" => Ok((quote!(::es_mapper::OperationKind::Search), "search")),
            "count" => Ok((quote!(::es_mapper::OperationKind::Count), "count")),
            "aggregation" | "agg" | "aggs" => Ok((
                quote!(::es_mapper::OperationKind::Aggregation),
                "aggregate",
            )),
            "bulk" => Ok((quote!(::es_mapper::OperationKind::Bulk), "bulk")),
            _ => Err(syn::Error::new(
                kind.span(),
                "kind must be one of search, count, aggregation, bulk",
            )),
        }
    }

    fn template_tokens(&self) -> TokenStream2 {
        // 文件模板在编译期读入
        let include = |path: &LitStr| {
            quote! { include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/", #path)) }
        };
        match &self.template {
            Some(Template::Native(t)) => quote!(::es_mapper::TemplateSource::Native(#t.to_string())),
            Some(Template::Sql(t)) => quote!(::es_mapper::TemplateSource::Sql(#t.to_string())),
            Some(Template::NativeFile(p)) => {
                let include = include(p);
                quote!(::es_mapper::TemplateSource::Native(#include.to_string()))
            }
            Some(Template::SqlFile(p)) => {
                let include = include(p);
                quote!(::es_mapper::TemplateSource::Sql(#include.to_string()))
            }
            None => quote!(),
        }
    }

    fn decl_tokens(&self, method_name: &str) -> syn::Result<TokenStream2> {
        let template = self.template_tokens();
        let (kind, _) = self.kind()?;
        let paginated = self.paginated;
        let page_size = option_tokens(self.page_size.as_ref());
        let offset = option_tokens(self.offset.as_ref());
        let timeout_ms = option_tokens(self.timeout_ms.as_ref());
        let collection = match &self.collection {
            Some(c) => quote!(Some(#c.to_string())),
            None => quote!(None),
        };
        let sort = match &self.sort {
            Some(s) => quote!(::es_mapper::SortField::parse_list(#s)),
            None => quote!(Vec::new()),
        };
        let highlight: Vec<String> = self
            .highlight
            .as_ref()
            .map(|h| {
                h.value()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(quote! {
            {
                let mut decl = ::es_mapper::MethodDecl::new(#method_name);
                decl.template = Some(#template);
                decl.collection = #collection;
                decl.kind = #kind;
                decl.paginated = #paginated;
                decl.page_size = #page_size;
                decl.offset = #offset;
                decl.sort = #sort;
                decl.highlight = vec![#(#highlight.to_string()),*];
                decl.timeout_ms = #timeout_ms;
                decl
            }
        })
    }
}

fn option_tokens(lit: Option<&LitInt>) -> TokenStream2 {
    match lit {
        Some(lit) => quote!(Some(#lit)),
        None => quote!(None),
    }
}

fn take_attr(attrs: &mut Vec<Attribute>, name: &str) -> Option<Attribute> {
    let index = attrs.iter().position(|attr| attr.path().is_ident(name))?;
    Some(attrs.remove(index))
}

/// 生成实现方法，参数统一改名为 `__argN`
fn proxy_method(
    method: &mut TraitItemFn,
    query: Option<&QueryArgs>,
) -> syn::Result<Option<TokenStream2>> {
    let method_name = method.sig.ident.to_string();
    // 有默认实现的方法不覆盖，同步方法也可以
    if query.is_none() && method.default.is_some() {
        for input in method.sig.inputs.iter_mut() {
            if let FnArg::Typed(pat_type) = input {
                pat_type.attrs.retain(|attr| !attr.path().is_ident("param"));
            }
        }
        return Ok(None);
    }
    if method.sig.asyncness.is_none() {
        return Err(syn::Error::new(
            method.sig.fn_token.span(),
            "mapper methods must be `async fn`",
        ));
    }

    let mut sig = method.sig.clone();
    let mut names = Vec::new();
    let mut args = Vec::new();
    for (index, (input, original)) in sig
        .inputs
        .iter_mut()
        .zip(method.sig.inputs.iter_mut())
        .enumerate()
    {
        let (FnArg::Typed(pat_type), FnArg::Typed(original)) = (input, original) else {
            continue;
        };
        // 显式 #[param("name")] 优先于参数名
        let explicit = take_attr(&mut original.attrs, "param")
            .map(|attr| attr.parse_args::<LitStr>())
            .transpose()?;
        pat_type.attrs.retain(|attr| !attr.path().is_ident("param"));
        let name = match (explicit, pat_type.pat.as_ref()) {
            (Some(lit), _) => lit.value(),
            (None, Pat::Ident(ident)) => ident.ident.to_string().trim_start_matches("r#").to_string(),
            (None, other) => {
                return Err(syn::Error::new(
                    other.span(),
                    "parameter needs a plain name or #[param(\"name\")]",
                ));
            }
        };
        if names.contains(&name) {
            return Err(syn::Error::new(
                pat_type.span(),
                format!("duplicate parameter name `{name}`"),
            ));
        }
        let arg = format_ident!("__arg{}", index);
        pat_type.pat = Box::new(Pat::Ident(PatIdent {
            attrs: Vec::new(),
            by_ref: None,
            mutability: None,
            ident: arg.clone(),
            subpat: None,
        }));
        names.push(name);
        args.push(arg);
    }

    let body = match query {
        Some(query) => {
            let (_, call) = query.kind()?;
            let call = format_ident!("{}", call);
            quote! {
                {
                    let descriptor = self.client.descriptor(
                        <Self as ::es_mapper::MapperProxy>::INTERFACE,
                        #method_name,
                    )?;
                    let params = ::es_mapper::bind(
                        &[#(#names),*],
                        vec![#(::es_mapper::to_param(&#args)?),*],
                    )?;
                    Ok(self.client.#call(&descriptor, params).await?)
                }
            }
        }
        None => quote! {
            {
                let _ = (#(#args,)*);
                Err(::es_mapper::Error::UnmappedMethod {
                    interface: <Self as ::es_mapper::MapperProxy>::INTERFACE.to_string(),
                    method: #method_name.to_string(),
                }
                .into())
            }
        },
    };

    Ok(Some(quote! {
        #sig #body
    }))
}

fn expand(default_collection: Option<LitStr>, item_trait: &mut ItemTrait) -> syn::Result<TokenStream2> {
    let trait_name = item_trait.ident.clone();
    let proxy_name = format_ident!("{}Proxy", trait_name);
    let vis = item_trait.vis.clone();

    let mut decls = Vec::new();
    let mut methods = Vec::new();
    for item in item_trait.items.iter_mut() {
        let TraitItem::Fn(method) = item else {
            continue;
        };
        let query = take_attr(&mut method.attrs, "query")
            .map(|attr| QueryArgs::parse(&attr))
            .transpose()?;
        if let Some(query) = &query {
            decls.push(query.decl_tokens(&method.sig.ident.to_string())?);
        }
        if let Some(tokens) = proxy_method(method, query.as_ref())? {
            methods.push(tokens);
        }
    }

    let default_collection = match default_collection {
        Some(c) => quote!(Some(#c.to_string())),
        None => quote!(None),
    };
    let interface_path = quote!(concat!(module_path!(), "::", stringify!(#trait_name)));
    let doc = LitStr::new(
        &format!("[`{trait_name}`] 的查询代理，由 `#[mapper]` 生成"),
        Span::call_site(),
    );

    Ok(quote! {
        #[allow(async_fn_in_trait)]
        #item_trait

        #[doc = #doc]
        #[derive(Clone)]
        #vis struct #proxy_name {
            client: ::es_mapper::Client,
        }

        impl ::es_mapper::MapperProxy for #proxy_name {
            const INTERFACE: &'static str = #interface_path;

            fn interface_spec() -> ::es_mapper::InterfaceSpec {
                ::es_mapper::InterfaceSpec {
                    interface: Self::INTERFACE.to_string(),
                    default_collection: #default_collection,
                    methods: vec![#(#decls),*],
                }
            }

            fn from_client(client: ::es_mapper::Client) -> Self {
                Self { client }
            }
        }

        impl #trait_name for #proxy_name {
            #(#methods)*
        }

        ::es_mapper::inventory::submit! {
            ::es_mapper::MapperMeta {
                interface: #interface_path,
                interface_spec: <#proxy_name as ::es_mapper::MapperProxy>::interface_spec,
            }
        }
    })
}
