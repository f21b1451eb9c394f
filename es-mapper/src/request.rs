use serde_json::{Map, Value, json};

use crate::{
    binder::Params,
    descriptor::{OperationKind, QueryDescriptor, QueryTemplate},
    error::{Error, Result},
};

pub const FROM_PARAM: &str = "from";
pub const SIZE_PARAM: &str = "size";

/// 一次调用渲染（SQL 模板还经过翻译）后的查询
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedQuery {
    pub collection: String,
    pub body: String,
    pub offset: u32,
    pub size: u32,
}

/// 从参数读取 `from`/`size`，缺省用描述符的默认值；负偏移和非正页大小报错
pub fn page_window(descriptor: &QueryDescriptor, params: &Params) -> Result<(u32, u32)> {
    let from = params.int_or(FROM_PARAM, descriptor.default_offset as i64)?;
    let size = params.int_or(SIZE_PARAM, descriptor.default_page_size as i64)?;
    match (u32::try_from(from), u32::try_from(size)) {
        (Ok(offset), Ok(limit)) if limit > 0 => Ok((offset, limit)),
        _ => Err(Error::InvalidPagination { from, size }),
    }
}

pub fn endpoint(collection: &str, kind: OperationKind) -> Result<String> {
    match kind {
        OperationKind::Search | OperationKind::Aggregation => Ok(format!("{collection}/_search")),
        OperationKind::Count => Ok(format!("{collection}/_count")),
        OperationKind::Bulk => Err(Error::UnsupportedOperation(format!(
            "bulk on {collection}"
        ))),
    }
}

fn parse_object(body: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::InvalidTemplate(format!(
            "query body must be a JSON object, got {other}"
        ))),
        Err(e) => Err(Error::InvalidTemplate(format!("query body is not JSON: {e}"))),
    }
}

fn timeout_hint(descriptor: &QueryDescriptor) -> Value {
    Value::String(format!("{}ms", descriptor.timeout_ms()))
}

/// 按 `descriptor.kind` 生成最终发送给引擎的请求体
pub fn shape(descriptor: &QueryDescriptor, query: &RenderedQuery) -> Result<Vec<u8>> {
    let mut body = parse_object(&query.body)?;
    let shaped = match descriptor.kind {
        OperationKind::Search => {
            if descriptor.paginated {
                body.insert(FROM_PARAM.into(), json!(query.offset));
                body.insert(SIZE_PARAM.into(), json!(query.size));
            }
            // SQL 翻译结果总是带 sort，声明的排序覆盖它；原生模板里写的 sort 优先
            let translated = matches!(descriptor.template, QueryTemplate::Sql(_));
            if !descriptor.sort.is_empty() && (translated || !body.contains_key("sort")) {
                let sort = descriptor
                    .sort
                    .iter()
                    .map(|s| {
                        let mut clause = Map::new();
                        clause.insert(s.field.clone(), json!({ "order": s.direction.as_str() }));
                        Value::Object(clause)
                    })
                    .collect();
                body.insert("sort".into(), Value::Array(sort));
            }
            if !descriptor.highlight_fields.is_empty() {
                add_highlight(&mut body, descriptor);
            }
            body.entry("timeout").or_insert_with(|| timeout_hint(descriptor));
            body
        }
        OperationKind::Count => {
            let query = body
                .remove("query")
                .unwrap_or_else(|| json!({ "match_all": {} }));
            let mut count = Map::new();
            count.insert("query".into(), query);
            count
        }
        OperationKind::Aggregation => {
            // 只要聚合桶，不要命中文档
            body.insert(SIZE_PARAM.into(), json!(0));
            body.remove(FROM_PARAM);
            body.entry("timeout").or_insert_with(|| timeout_hint(descriptor));
            body
        }
        OperationKind::Bulk => {
            return Err(Error::UnsupportedOperation(format!(
                "{}::{} is a bulk operation",
                descriptor.interface, descriptor.method
            )));
        }
    };
    serde_json::to_vec(&Value::Object(shaped)).map_err(Error::InvalidParameter)
}

fn add_highlight(body: &mut Map<String, Value>, descriptor: &QueryDescriptor) {
    let highlight = body
        .entry("highlight")
        .or_insert_with(|| json!({}));
    let Some(highlight) = highlight.as_object_mut() else {
        return;
    };
    let fields = highlight.entry("fields").or_insert_with(|| json!({}));
    if let Some(fields) = fields.as_object_mut() {
        for field in &descriptor.highlight_fields {
            fields.entry(field.clone()).or_insert_with(|| json!({}));
        }
    }
}
