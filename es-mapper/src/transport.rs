use futures::future::BoxFuture;
use reqwest::header::{CONTENT_TYPE, HeaderValue};

use crate::{
    config::ClientConfig,
    error::{Error, Result},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// 与引擎交互的唯一接口：向路径 POST JSON，返回状态码和响应体。实现需可并发共享
pub trait Transport: Send + Sync {
    fn post<'a>(&'a self, path: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<RawResponse>>;
}

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        // 连接池有界，空闲连接超时回收
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(Error::transport)?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Transport for HttpTransport {
    fn post<'a>(&'a self, path: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<RawResponse>> {
        Box::pin(async move {
            let url = self.url(path);
            log::debug!("POST {} ({} bytes)", url, body.len());

            let mut request = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body);
            if let Some(username) = &self.username {
                request = request.basic_auth(username, self.password.as_deref());
            }

            let response = request.send().await.map_err(|e| {
                log::warn!("POST {} failed: {}", url, e);
                Error::transport(e)
            })?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(Error::transport)?.to_vec();
            Ok(RawResponse { status, body })
        })
    }
}
