//! 面向 Elasticsearch 兼容引擎的声明式查询映射
//!
//! 用 [`mapper`] 标注的 trait 每个方法声明一条查询，原生 JSON 模板或由引擎翻译的 SQL。
//! 宏生成 `{Trait}Proxy`：绑定参数、替换 `#{name}` 占位符、按需翻译、经 HTTP 执行，
//! 再把响应解码为方法的返回类型。
//!
//! ```no_run
//! use es_mapper::{Client, ClientConfig, Error, PageResult};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! pub struct Product {
//!     pub id: u64,
//!     pub name: String,
//! }
//!
//! #[es_mapper::mapper(collection = "products")]
//! pub trait ProductMapper {
//!     #[query(native = r##"{"query":{"match":{"name":"#{name}"}}}"##, paginated, page_size = 20)]
//!     async fn search(&self, name: String, from: i64, size: i64) -> Result<PageResult<Product>, Error>;
//!
//!     #[query(sql = "SELECT * FROM products WHERE brand = #{brand}", kind = "count")]
//!     async fn has_brand(&self, brand: String) -> Result<bool, Error>;
//! }
//!
//! # async fn run() -> Result<(), Error> {
//! let client = Client::new(ClientConfig::load()?)?;
//! let products = client.mapper::<ProductMapperProxy>()?;
//! let page = products.search("shoes".into(), 0, 20).await?;
//! println!("{} of {}", page.data.len(), page.total);
//! # Ok(())
//! # }
//! ```

mod binder;
mod client;
mod config;
mod descriptor;
mod error;
mod registry;
mod render;
mod request;
mod result;
mod translate;
mod transport;

pub use binder::{ParameterBinding, Params, bind, to_param};
pub use client::Client;
pub use config::ClientConfig;
pub use descriptor::{
    InterfaceSpec, MethodDecl, OperationKind, QueryDescriptor, QueryTemplate, SortDirection,
    SortField, TemplateSource,
};
pub use error::{Error, Result};
pub use es_mapper_derive::mapper;
pub use registry::{MapperEntry, MapperRegistry};
pub use render::{RenderMode, render};
pub use request::{RenderedQuery, page_window, shape};
pub use result::{FromCount, FromHits, PageResult, SearchHits};
pub use translate::Translator;
pub use transport::{HttpTransport, RawResponse, Transport};

#[doc(hidden)]
pub use inventory;

/// 由 `#[mapper]` 生成的 `{Trait}Proxy` 实现
pub trait MapperProxy: Sized {
    /// 接口的完整路径，作为注册表的键
    const INTERFACE: &'static str;

    /// 静态声明表
    fn interface_spec() -> InterfaceSpec;

    fn from_client(client: Client) -> Self;
}

// 定义映射接口元信息
pub struct MapperMeta {
    pub interface: &'static str,
    pub interface_spec: fn() -> InterfaceSpec,
}

impl std::fmt::Debug for MapperMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MapperMeta {{ interface: {}, methods: {:?} }}",
            self.interface,
            (self.interface_spec)()
                .methods
                .iter()
                .map(|m| m.method.as_str())
                .collect::<Vec<_>>()
        )
    }
}

// 使用 inventory 收集所有映射接口
inventory::collect!(MapperMeta);

// 获取所有已声明的映射接口
pub fn all_mappers() -> Vec<&'static str> {
    let mut names: Vec<_> = inventory::iter::<MapperMeta>()
        .map(|meta| meta.interface)
        .collect();
    names.sort_unstable();
    names
}
