use serde_json::{Value, json};

use crate::{
    error::{Error, Result},
    transport::{RawResponse, Transport},
};

pub const TRANSLATE_PATH: &str = "_sql/translate";

/// 由引擎把 SQL 翻译为原生查询
pub struct Translator<'a> {
    transport: &'a dyn Transport,
}

impl<'a> Translator<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    pub async fn translate(&self, sql: &str) -> Result<String> {
        let body = serde_json::to_vec(&json!({ "query": sql })).map_err(Error::InvalidParameter)?;
        let response = self.transport.post(TRANSLATE_PATH, body).await?;
        if !response.is_success() {
            let reason = engine_reason(&response);
            log::warn!("sql translation failed ({}): {}", response.status, reason);
            return Err(Error::TranslationFailed(reason));
        }
        String::from_utf8(response.body).map_err(Error::decode)
    }
}

/// 取引擎错误中的 `error.reason`，取不到时返回原始响应体
pub(crate) fn engine_reason(response: &RawResponse) -> String {
    let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();
    let reason = parsed.as_ref().and_then(|v| match v.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(err) => err
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string),
        None => None,
    });
    reason.unwrap_or_else(|| response.text())
}
