use std::collections::HashMap;

use es_mapper::{Client, ClientConfig, Error, PageResult, Params};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub category: String,
}

#[es_mapper::mapper(collection = "products")]
pub trait ProductMapper {
    #[query(
        native = r##"{"query":{"match":{"name":"#{name}"}}}"##,
        paginated,
        page_size = 5,
        sort = "id:asc",
        highlight = "name"
    )]
    async fn search(&self, name: String, from: i64, size: i64) -> Result<PageResult<Product>, Error>;

    #[query(sql = "SELECT * FROM products WHERE category = ?", kind = "count")]
    async fn has_category(&self, category: String) -> Result<bool, Error>;

    #[query(
        native = r#"{"query":{"match_all":{}},"aggs":{"by_category":{"terms":{"field":"category"}}}}"#,
        kind = "aggregation"
    )]
    async fn category_counts(&self) -> Result<HashMap<String, i64>, Error>;
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    // 读取 es-mapper.toml 与 ES_MAPPER_* 环境变量
    let client = Client::new(ClientConfig::load()?)?;
    println!("mappers: {:?}", es_mapper::all_mappers());

    let products = client.mapper::<ProductMapperProxy>()?;

    let page = products.search("shoes".into(), 0, 5).await?;
    println!("page 0: {} of {} (more: {})", page.data.len(), page.total, page.has_next());
    for product in &page.data {
        println!("  #{} {} [{}]", product.id, product.name, product.category);
    }

    println!("has shoes: {}", products.has_category("shoes".into()).await?);
    println!("categories: {:?}", products.category_counts().await?);

    // 不经过代理，按接口名和方法名调用
    let raw = client
        .invoke(
            <ProductMapperProxy as es_mapper::MapperProxy>::INTERFACE,
            "search",
            Params::new().with("name", "boots")?,
        )
        .await?;
    println!("raw: {}", raw);

    Ok(())
}
