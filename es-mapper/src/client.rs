use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::{
    MapperProxy,
    binder::Params,
    config::ClientConfig,
    descriptor::{OperationKind, QueryDescriptor, QueryTemplate},
    error::{Error, Result},
    registry::MapperRegistry,
    render::{RenderMode, render},
    request::{RenderedQuery, endpoint, page_window, shape},
    result::{
        FromCount, FromHits, SearchHits, decode_aggregations, decode_count, decode_hits,
        parse_response,
    },
    translate::{Translator, engine_reason},
    transport::{HttpTransport, Transport},
};

/// 执行映射查询的入口，克隆共享传输层（连接池）和注册表
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    registry: Arc<MapperRegistry>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// 连接 `config.base_url`，使用进程级注册表
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(
            transport,
            MapperRegistry::global(),
            config,
        ))
    }

    pub fn with_transport(
        transport: impl Transport + 'static,
        registry: Arc<MapperRegistry>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            registry,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<MapperRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 返回 `#[mapper]` 生成的代理，注册表中没有该接口时先注册
    pub fn mapper<P: MapperProxy>(&self) -> Result<P> {
        if !self.registry.contains(P::INTERFACE) {
            self.registry.register(P::interface_spec())?;
        }
        Ok(P::from_client(self.clone()))
    }

    pub fn descriptor(&self, interface: &str, method: &str) -> Result<Arc<QueryDescriptor>> {
        self.registry.lookup(interface, method)
    }

    pub async fn translate(&self, sql: &str) -> Result<String> {
        let deadline = Duration::from_millis(self.config.default_timeout_ms);
        with_deadline(deadline, Translator::new(self.transport.as_ref()).translate(sql)).await
    }

    /// 直接发送已成形的请求体
    pub async fn execute(&self, collection: &str, body: Vec<u8>, kind: OperationKind) -> Result<Vec<u8>> {
        let deadline = Duration::from_millis(self.config.default_timeout_ms);
        with_deadline(deadline, self.send(collection, body, kind)).await
    }

    async fn send(&self, collection: &str, body: Vec<u8>, kind: OperationKind) -> Result<Vec<u8>> {
        let path = endpoint(collection, kind)?;
        let response = self.transport.post(&path, body).await?;
        if !response.is_success() {
            let message = engine_reason(&response);
            log::warn!("{} returned {}: {}", path, response.status, message);
            return Err(Error::Transport {
                status: Some(response.status),
                message,
            });
        }
        Ok(response.body)
    }

    /// 渲染模板，SQL 模板再交给引擎翻译；占位符总是先于翻译替换
    pub async fn prepare(&self, descriptor: &QueryDescriptor, params: &Params) -> Result<RenderedQuery> {
        let (offset, size) = if descriptor.paginated {
            page_window(descriptor, params)?
        } else {
            (0, 0)
        };
        let body = match &descriptor.template {
            QueryTemplate::Native(template) => render(template, params, RenderMode::Native)?,
            QueryTemplate::Sql(template) => {
                let sql = render(template, params, RenderMode::Sql)?;
                log::debug!("{}::{} translating: {}", descriptor.interface, descriptor.method, sql);
                Translator::new(self.transport.as_ref()).translate(&sql).await?
            }
        };
        Ok(RenderedQuery {
            collection: descriptor.collection.clone(),
            body,
            offset,
            size,
        })
    }

    // Bound → Rendered → [Translated] → Executed，超时覆盖整个过程
    async fn run(&self, descriptor: &QueryDescriptor, params: Params) -> Result<(Value, RenderedQuery)> {
        let pipeline = async {
            let query = self.prepare(descriptor, &params).await?;
            let body = shape(descriptor, &query)?;
            let raw = self.send(&query.collection, body, descriptor.kind).await?;
            Ok::<_, Error>((parse_response(&raw)?, query))
        };
        with_deadline(descriptor.timeout, pipeline).await
    }

    fn expect_kind(descriptor: &QueryDescriptor, kind: OperationKind) -> Result<()> {
        if descriptor.kind == kind {
            return Ok(());
        }
        Err(Error::UnsupportedOperation(format!(
            "{}::{} is a {} query, not {}",
            descriptor.interface,
            descriptor.method,
            descriptor.kind.as_str(),
            kind.as_str()
        )))
    }

    pub async fn search<R: FromHits>(&self, descriptor: &QueryDescriptor, params: Params) -> Result<R> {
        Self::expect_kind(descriptor, OperationKind::Search)?;
        let (response, query) = self.run(descriptor, params).await?;
        let hits = decode_hits(&response, &descriptor.highlight_fields, query.offset, query.size)?;
        log::debug!(
            "{}::{} decoded {} hits",
            descriptor.interface,
            descriptor.method,
            hits.sources.len()
        );
        R::from_hits(hits)
    }

    pub async fn count<R: FromCount>(&self, descriptor: &QueryDescriptor, params: Params) -> Result<R> {
        Self::expect_kind(descriptor, OperationKind::Count)?;
        let (response, _) = self.run(descriptor, params).await?;
        R::from_count(decode_count(&response)?)
    }

    pub async fn aggregate<R: DeserializeOwned>(&self, descriptor: &QueryDescriptor, params: Params) -> Result<R> {
        Self::expect_kind(descriptor, OperationKind::Aggregation)?;
        let (response, _) = self.run(descriptor, params).await?;
        decode_aggregations(&response)
    }

    pub async fn bulk(&self, descriptor: &QueryDescriptor, _params: Params) -> Result<()> {
        Err(Error::UnsupportedOperation(format!(
            "{}::{} is a {} operation",
            descriptor.interface,
            descriptor.method,
            descriptor.kind.as_str()
        )))
    }

    /// 按接口名和方法名调用。搜索返回 `{"total", "data"}`，计数返回数字，
    /// 聚合返回 `aggregations` 对象
    pub async fn invoke(&self, interface: &str, method: &str, params: Params) -> Result<Value> {
        let descriptor = self.descriptor(interface, method)?;
        match descriptor.kind {
            OperationKind::Search => {
                let hits: SearchHits = self.search(&descriptor, params).await?;
                Ok(json!({ "total": hits.total, "data": hits.sources }))
            }
            OperationKind::Count => Ok(json!(self.count::<u64>(&descriptor, params).await?)),
            OperationKind::Aggregation => self.aggregate(&descriptor, params).await,
            OperationKind::Bulk => {
                self.bulk(&descriptor, params).await?;
                Ok(Value::Null)
            }
        }
    }
}

async fn with_deadline<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = limit.as_millis() as u64;
            log::warn!("query timed out after {}ms", timeout_ms);
            Err(Error::EngineTimeout { timeout_ms })
        }
    }
}
