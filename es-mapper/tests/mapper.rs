use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use es_mapper::{
    Client, ClientConfig, Error, InterfaceSpec, MapperProxy, MapperRegistry, MethodDecl,
    OperationKind, PageResult, Params, RawResponse, Transport,
};
use futures::future::{BoxFuture, join_all};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize, PartialEq)]
struct Product {
    id: u64,
    name: String,
    category: String,
}

#[es_mapper::mapper(collection = "products")]
trait ProductMapper {
    #[query(native = r##"{"query":{"match":{"name":"#{name}"}}}"##)]
    async fn find_by_name(&self, name: String) -> Result<Vec<Product>, Error>;

    #[query(
        native = r##"{"query":{"term":{"category":"#{category}"}}}"##,
        paginated,
        page_size = 10,
        sort = "price:desc"
    )]
    async fn page_by_category(
        &self,
        category: String,
        from: i64,
        size: i64,
    ) -> Result<PageResult<Product>, Error>;

    #[query(native = r#"{"query":{"ids":{"values":[#{id}]}}}"#, highlight = "name")]
    async fn get(&self, #[param("id")] product_id: u64) -> Result<Option<Product>, Error>;

    #[query(sql = "SELECT * FROM products WHERE category = ?", kind = "count")]
    async fn has_category(&self, category: String) -> Result<bool, Error>;

    #[query(native = r#"{"query":{"match_all":{}}}"#, kind = "count", collection = "archived_products")]
    async fn count_archived(&self) -> Result<u64, Error>;

    #[query(native_file = "tests/queries/category_buckets.json", kind = "aggregation")]
    async fn category_counts(&self, brand: String) -> Result<HashMap<String, i64>, Error>;

    #[query(sql = "SELECT id, name, category FROM products WHERE category = #{category}")]
    async fn by_category_sql(&self, category: String) -> Result<Vec<Product>, Error>;

    #[query(native = r#"{"query":{"match_all":{}}}"#, timeout_ms = 50)]
    async fn slow(&self) -> Result<Vec<Product>, Error>;

    #[query(native = "{}", kind = "bulk")]
    async fn reindex(&self) -> Result<(), Error>;

    async fn unmapped(&self, name: String) -> Result<Vec<Product>, Error>;

    async fn first_by_name(&self, name: String) -> Result<Option<Product>, Error> {
        Ok(self.find_by_name(name).await?.into_iter().next())
    }

    fn label(&self) -> &'static str {
        "products"
    }
}

/// 内存引擎：按路径预置响应，记录每个请求
#[derive(Clone, Default)]
struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    responses: HashMap<String, VecDeque<RawResponse>>,
    requests: Vec<(String, Value)>,
    delay: Option<Duration>,
}

impl MockEngine {
    fn respond(&self, path: &str, status: u16, body: Value) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(path.to_string())
            .or_default()
            .push_back(RawResponse {
                status,
                body: serde_json::to_vec(&body).unwrap(),
            });
        self
    }

    fn delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    fn requests(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl Transport for MockEngine {
    fn post<'a>(&'a self, path: &'a str, body: Vec<u8>) -> BoxFuture<'a, es_mapper::Result<RawResponse>> {
        Box::pin(async move {
            let delay = self.state.lock().unwrap().delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.state.lock().unwrap();
            state
                .requests
                .push((path.to_string(), serde_json::from_slice(&body).unwrap()));
            state
                .responses
                .get_mut(path)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| Error::Transport {
                    status: None,
                    message: format!("connection refused: {path}"),
                })
        })
    }
}

fn setup() -> (MockEngine, Client, ProductMapperProxy) {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = MockEngine::default();
    let client = Client::with_transport(
        engine.clone(),
        Arc::new(MapperRegistry::new()),
        ClientConfig::default(),
    );
    let mapper = client.mapper::<ProductMapperProxy>().unwrap();
    (engine, client, mapper)
}

fn hits(total: i64, docs: &[(u64, &str, &str)]) -> Value {
    let hits: Vec<_> = docs
        .iter()
        .map(|(id, name, category)| {
            json!({"_id": id.to_string(), "_source": {"id": id, "name": name, "category": category}})
        })
        .collect();
    json!({"took": 1, "timed_out": false, "hits": {"total": {"value": total, "relation": "eq"}, "hits": hits}})
}

#[tokio::test]
async fn native_search_renders_and_decodes() {
    let (engine, _, mapper) = setup();
    engine.respond(
        "products/_search",
        200,
        hits(2, &[(1, "trail shoes", "shoes"), (2, "road shoes", "shoes")]),
    );

    let products = mapper.find_by_name("shoes".into()).await.unwrap();
    assert_eq!(products.len(), 2);
    assert_eq!(products[1].name, "road shoes");

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    let (path, body) = &requests[0];
    assert_eq!(path, "products/_search");
    assert_eq!(body["query"], json!({"match": {"name": "shoes"}}));
    assert_eq!(body["timeout"], "10000ms");
    assert!(body.get("from").is_none());
}

#[tokio::test]
async fn paginated_search_keeps_engine_total() {
    let (engine, _, mapper) = setup();
    let docs: Vec<_> = (20..30).map(|i| (i, "shoe", "shoes")).collect();
    engine.respond("products/_search", 200, hits(45, &docs));

    let page = mapper
        .page_by_category("shoes".into(), 20, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 45);
    assert!(page.data.len() <= 10);
    assert_eq!(page.offset, 20);
    assert_eq!(page.size, 10);
    assert!(page.has_next());

    let (_, body) = &engine.requests()[0];
    assert_eq!(body["from"], 20);
    assert_eq!(body["size"], 10);
    assert_eq!(body["sort"], json!([{"price": {"order": "desc"}}]));
}

#[tokio::test]
async fn invalid_page_size_is_rejected_before_sending() {
    let (engine, _, mapper) = setup();
    let err = mapper
        .page_by_category("shoes".into(), 0, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPagination { from: 0, size: 0 }));
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn explicit_parameter_name_and_highlight() {
    let (engine, _, mapper) = setup();
    engine.respond(
        "products/_search",
        200,
        json!({"hits": {"total": 1, "hits": [{
            "_source": {"id": 7, "name": "red shoes", "category": "shoes"},
            "highlight": {"name": ["<em>red</em> shoes"]}
        }]}}),
    );

    let product = mapper.get(7).await.unwrap().unwrap();
    assert_eq!(product.id, 7);
    assert_eq!(product.name, "<em>red</em> shoes");

    let (_, body) = &engine.requests()[0];
    assert_eq!(body["query"], json!({"ids": {"values": [7]}}));
    assert_eq!(body["highlight"], json!({"fields": {"name": {}}}));
}

#[tokio::test]
async fn sql_count_is_quoted_then_translated() {
    let (engine, _, mapper) = setup();
    let translated = json!({
        "size": 1000,
        "query": {"term": {"category.keyword": {"value": "shoes"}}},
        "_source": false,
        "sort": [{"_doc": {"order": "asc"}}]
    });
    engine
        .respond("_sql/translate", 200, translated.clone())
        .respond("_sql/translate", 200, translated)
        .respond("products/_count", 200, json!({"count": 0}))
        .respond("products/_count", 200, json!({"count": 1}));

    assert!(!mapper.has_category("shoes".into()).await.unwrap());
    assert!(mapper.has_category("shoes".into()).await.unwrap());

    let requests = engine.requests();
    assert_eq!(requests[0].0, "_sql/translate");
    assert_eq!(
        requests[0].1,
        json!({"query": "SELECT * FROM products WHERE category = 'shoes'"})
    );
    assert_eq!(requests[1].0, "products/_count");
    assert_eq!(
        requests[1].1,
        json!({"query": {"term": {"category.keyword": {"value": "shoes"}}}})
    );
}

#[tokio::test]
async fn sql_search_decodes_translated_fields() {
    let (engine, _, mapper) = setup();
    engine
        .respond(
            "_sql/translate",
            200,
            json!({"size": 1000, "query": {"term": {"category": {"value": "it's"}}}, "_source": false,
                   "fields": [{"field": "id"}, {"field": "name"}, {"field": "category"}]}),
        )
        .respond(
            "products/_search",
            200,
            json!({"hits": {"total": {"value": 1}, "hits": [
                {"fields": {"id": [3], "name": ["sandal"], "category": ["it's"]}}
            ]}}),
        );

    let products = mapper.by_category_sql("it's".into()).await.unwrap();
    assert_eq!(
        products,
        vec![Product {
            id: 3,
            name: "sandal".into(),
            category: "it's".into()
        }]
    );
    assert_eq!(
        engine.requests()[0].1["query"],
        "SELECT id, name, category FROM products WHERE category = 'it''s'"
    );
}

#[tokio::test]
async fn translation_failure_is_not_a_transport_error() {
    let (engine, _, mapper) = setup();
    engine.respond(
        "_sql/translate",
        400,
        json!({"error": {"type": "verification_exception", "reason": "Unknown index [products]"}, "status": 400}),
    );

    let err = mapper.has_category("shoes".into()).await.unwrap_err();
    assert!(matches!(err, Error::TranslationFailed(ref reason) if reason == "Unknown index [products]"));
    assert_eq!(engine.requests().len(), 1);
}

#[tokio::test]
async fn aggregation_from_template_file() {
    let (engine, _, mapper) = setup();
    engine.respond(
        "products/_search",
        200,
        json!({"hits": {"total": 9, "hits": []}, "aggregations": {"cat": {"buckets": [{"key": "shoes", "doc_count": 3}]}}}),
    );

    let counts = mapper.category_counts("acme".into()).await.unwrap();
    assert_eq!(counts, HashMap::from([("shoes".to_string(), 3)]));

    let (path, body) = &engine.requests()[0];
    assert_eq!(path, "products/_search");
    assert_eq!(body["size"], 0);
    assert_eq!(body["query"], json!({"term": {"brand": "acme"}}));
    assert_eq!(body["aggs"]["cat"]["terms"]["field"], "category");
}

#[tokio::test]
async fn method_collection_overrides_default() {
    let (engine, _, mapper) = setup();
    engine.respond("archived_products/_count", 200, json!({"count": 12}));
    assert_eq!(mapper.count_archived().await.unwrap(), 12);
    assert_eq!(engine.requests()[0].1, json!({"query": {"match_all": {}}}));
}

#[tokio::test]
async fn timeout_cancels_the_call() {
    let (engine, _, mapper) = setup();
    engine.respond("products/_search", 200, hits(0, &[]));
    engine.delay(Duration::from_millis(500));

    let err = mapper.slow().await.unwrap_err();
    assert!(matches!(err, Error::EngineTimeout { timeout_ms: 50 }));
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn engine_errors_surface_unchanged() {
    let (engine, _, mapper) = setup();
    engine.respond(
        "products/_search",
        503,
        json!({"error": {"reason": "all shards failed"}, "status": 503}),
    );
    let err = mapper.find_by_name("x".into()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transport { status: Some(503), ref message } if message == "all shards failed"
    ));

    // 没有预置响应，模拟网络失败，且不重试
    let err = mapper.find_by_name("x".into()).await.unwrap_err();
    assert!(matches!(err, Error::Transport { status: None, .. }));
    assert_eq!(engine.requests().len(), 2);
}

#[tokio::test]
async fn shape_mismatch_is_decode_error() {
    let (engine, _, mapper) = setup();
    engine.respond(
        "products/_search",
        200,
        json!({"hits": {"total": 1, "hits": [{"_source": {"id": "seven", "name": 1}}]}}),
    );
    let err = mapper.find_by_name("x".into()).await.unwrap_err();
    assert!(matches!(err, Error::DecodeError(_)));
}

#[tokio::test]
async fn bulk_unmapped_and_default_methods() {
    let (engine, _, mapper) = setup();

    assert!(matches!(
        mapper.reindex().await,
        Err(Error::UnsupportedOperation(_))
    ));
    assert!(matches!(
        mapper.unmapped("x".into()).await,
        Err(Error::UnmappedMethod { ref method, .. }) if method == "unmapped"
    ));

    engine.respond("products/_search", 200, hits(1, &[(5, "boot", "shoes")]));
    let first = mapper.first_by_name("boot".into()).await.unwrap();
    assert_eq!(first.map(|p| p.id), Some(5));
}

#[tokio::test]
async fn concurrent_calls_share_one_client() {
    let (engine, _, mapper) = setup();
    for i in 0..8 {
        engine.respond("products/_search", 200, hits(1, &[(i, "shoe", "shoes")]));
    }
    let calls = (0..8).map(|i| mapper.find_by_name(format!("shoe-{i}")));
    let results = join_all(calls).await;
    assert!(results.iter().all(|r| matches!(r, Ok(list) if list.len() == 1)));
    assert_eq!(engine.requests().len(), 8);
}

#[tokio::test]
async fn table_driven_invoke() {
    let (engine, client, _) = setup();
    client
        .registry()
        .register(
            InterfaceSpec::new("OrderMapper")
                .default_collection("orders")
                .method(
                    MethodDecl::new("by_status")
                        .native(r#"{"query":{"terms":{"status":#{status}}}}"#)
                        .paginated(5, 0),
                )
                .method(
                    MethodDecl::new("count_by_status")
                        .kind(OperationKind::Count)
                        .native(r##"{"query":{"term":{"status":"#{status}"}}}"##),
                ),
        )
        .unwrap();
    engine
        .respond(
            "orders/_search",
            200,
            json!({"hits": {"total": {"value": 11}, "hits": [{"_source": {"sn": "A1"}}]}}),
        )
        .respond("orders/_count", 200, json!({"count": 4}));

    let params = Params::new().with("status", vec!["paid", "shipped"]).unwrap();
    let result = client.invoke("OrderMapper", "by_status", params).await.unwrap();
    assert_eq!(result, json!({"total": 11, "data": [{"sn": "A1"}]}));
    let (_, body) = &engine.requests()[0];
    assert_eq!(body["query"], json!({"terms": {"status": ["paid", "shipped"]}}));
    assert_eq!(body["size"], 5);

    let params = Params::new().with("status", "paid").unwrap();
    let count = client
        .invoke("OrderMapper", "count_by_status", params)
        .await
        .unwrap();
    assert_eq!(count, json!(4));

    let err = client
        .invoke("OrderMapper", "cancel", Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnmappedMethod { .. }));
}

#[tokio::test]
async fn missing_parameter_fails_before_sending() {
    let (engine, client, _) = setup();
    let descriptor = client
        .descriptor(ProductMapperProxy::INTERFACE, "find_by_name")
        .unwrap();
    let err = client
        .search::<Vec<Product>>(&descriptor, Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingParameter(ref name) if name == "name"));

    let err = client
        .count::<u64>(&descriptor, Params::new().with("name", "x").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation(_)));
    assert!(engine.requests().is_empty());
}

#[test]
fn generated_declarations_register_idempotently() {
    assert!(es_mapper::all_mappers().contains(&ProductMapperProxy::INTERFACE));

    let scanned = MapperRegistry::from_inventory().unwrap();
    let entry = scanned.entry(ProductMapperProxy::INTERFACE).unwrap();
    // 无 #[query] 的方法不产生描述符
    assert_eq!(entry.descriptors.len(), 9);
    assert_eq!(entry.default_collection.as_deref(), Some("products"));

    let registry = MapperRegistry::new();
    registry.register(ProductMapperProxy::interface_spec()).unwrap();
    registry.register(ProductMapperProxy::interface_spec()).unwrap();
    assert_eq!(
        registry.entry(ProductMapperProxy::INTERFACE).unwrap(),
        entry
    );

    let get = registry
        .lookup(ProductMapperProxy::INTERFACE, "page_by_category")
        .unwrap();
    assert!(get.paginated);
    assert_eq!(get.default_page_size, 10);
    assert_eq!(get.sort, es_mapper::SortField::parse_list("price:desc"));
}

#[test]
fn sync_default_methods_are_kept() {
    let (_, _, mapper) = setup();
    assert_eq!(mapper.label(), "products");
}

#[tokio::test]
async fn execute_returns_raw_engine_bytes() {
    let (engine, client, _) = setup();
    engine.respond("products/_count", 200, json!({"count": 3}));

    let raw = client
        .execute(
            "products",
            br#"{"query":{"match_all":{}}}"#.to_vec(),
            OperationKind::Count,
        )
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(body, json!({"count": 3}));
    assert_eq!(engine.requests()[0].0, "products/_count");
}

#[tokio::test]
async fn execute_reports_engine_status_and_rejects_bulk() {
    let (engine, client, _) = setup();
    engine.respond(
        "products/_search",
        400,
        json!({"error": {"reason": "failed to parse query"}, "status": 400}),
    );
    let err = client
        .execute("products", b"{}".to_vec(), OperationKind::Search)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport { status: Some(400), ref message } if message == "failed to parse query"
    ));

    let err = client
        .execute("products", b"{}".to_vec(), OperationKind::Bulk)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation(_)));
    assert_eq!(engine.requests().len(), 1);
}

#[tokio::test]
async fn standalone_calls_use_configured_default_timeout() {
    let engine = MockEngine::default();
    let config = ClientConfig {
        default_timeout_ms: 30,
        ..ClientConfig::default()
    };
    let client = Client::with_transport(engine.clone(), Arc::new(MapperRegistry::new()), config);
    engine
        .respond("products/_search", 200, hits(0, &[]))
        .respond("_sql/translate", 200, json!({"size": 10}));
    engine.delay(Duration::from_millis(300));

    let err = client
        .execute("products", b"{}".to_vec(), OperationKind::Search)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EngineTimeout { timeout_ms: 30 }));
    let err = client.translate("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::EngineTimeout { timeout_ms: 30 }));

    // 映射方法不受配置默认值影响
    let _ = client.mapper::<ProductMapperProxy>().unwrap();
    let descriptor = client
        .descriptor(ProductMapperProxy::INTERFACE, "find_by_name")
        .unwrap();
    assert_eq!(descriptor.timeout_ms(), 10_000);
}

#[tokio::test]
async fn timeout_covers_translation_and_execution_together() {
    let (engine, client, _) = setup();
    client
        .registry()
        .register(
            InterfaceSpec::new("ReportMapper")
                .default_collection("products")
                .method(
                    MethodDecl::new("all")
                        .sql("SELECT id, name, category FROM products")
                        .timeout_ms(100),
                ),
        )
        .unwrap();
    engine
        .respond("_sql/translate", 200, json!({"size": 1000, "query": {"match_all": {}}}))
        .respond("products/_search", 200, hits(0, &[]));
    // 每一步单独都在 100ms 以内
    engine.delay(Duration::from_millis(60));

    let descriptor = client.descriptor("ReportMapper", "all").unwrap();
    let err = client
        .search::<Vec<Product>>(&descriptor, Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EngineTimeout { timeout_ms: 100 }));

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "_sql/translate");
}
