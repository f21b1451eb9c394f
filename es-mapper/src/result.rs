use std::collections::BTreeSet;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub data: Vec<T>,
    /// 引擎给出的总命中数，与 `data.len()` 无关
    pub total: i64,
    pub offset: u32,
    pub size: u32,
}

impl<T> PageResult<T> {
    pub fn has_next(&self) -> bool {
        (self.offset as i64 + self.data.len() as i64) < self.total
    }
}

/// 从 `hits.hits[]` 中取出的文档
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHits {
    pub total: Option<i64>,
    pub sources: Vec<Value>,
    pub offset: u32,
    pub size: u32,
}

pub trait FromHits: Sized {
    fn from_hits(hits: SearchHits) -> Result<Self>;
}

pub trait FromCount: Sized {
    fn from_count(count: u64) -> Result<Self>;
}

fn from_source<T: DeserializeOwned>(source: Value) -> Result<T> {
    serde_json::from_value(source).map_err(Error::decode)
}

impl<T: DeserializeOwned> FromHits for Vec<T> {
    fn from_hits(hits: SearchHits) -> Result<Self> {
        hits.sources.into_iter().map(from_source).collect()
    }
}

impl<T: DeserializeOwned> FromHits for Option<T> {
    fn from_hits(hits: SearchHits) -> Result<Self> {
        hits.sources.into_iter().next().map(from_source).transpose()
    }
}

impl<T: DeserializeOwned> FromHits for PageResult<T> {
    fn from_hits(hits: SearchHits) -> Result<Self> {
        let total = hits
            .total
            .ok_or_else(|| Error::decode("missing field hits.total"))?;
        Ok(PageResult {
            data: hits.sources.into_iter().map(from_source).collect::<Result<_>>()?,
            total,
            offset: hits.offset,
            size: hits.size,
        })
    }
}

impl FromHits for SearchHits {
    fn from_hits(hits: SearchHits) -> Result<Self> {
        Ok(hits)
    }
}

impl FromCount for bool {
    fn from_count(count: u64) -> Result<Self> {
        Ok(count > 0)
    }
}

macro_rules! impl_from_count {
    ($($T:ty),+) => {
        $(
            impl FromCount for $T {
                fn from_count(count: u64) -> Result<Self> {
                    <$T>::try_from(count).map_err(Error::decode)
                }
            }
        )+
    };
}

impl_from_count!(u64, i64, u32, usize);

pub fn parse_response(raw: &[u8]) -> Result<Value> {
    serde_json::from_slice(raw).map_err(Error::decode)
}

fn total_hits(hits: &Value) -> Option<i64> {
    match hits.get("total")? {
        Value::Number(n) => n.as_i64(),
        // 7.x 以后是 {"value": n, "relation": "eq"}
        Value::Object(total) => total.get("value")?.as_i64(),
        _ => None,
    }
}

/// 展开 `hits.hits[]`，声明的高亮字段用拼接后的片段覆盖原字段
pub fn decode_hits(
    response: &Value,
    highlight: &BTreeSet<String>,
    offset: u32,
    size: u32,
) -> Result<SearchHits> {
    let hits = response
        .get("hits")
        .ok_or_else(|| Error::decode("missing field hits"))?;
    let raw_hits = hits
        .get("hits")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::decode("missing field hits.hits"))?;

    let sources = raw_hits
        .iter()
        .map(|hit| hit_source(hit, highlight))
        .collect::<Result<Vec<_>>>()?;

    Ok(SearchHits {
        total: total_hits(hits),
        sources,
        offset,
        size,
    })
}

fn hit_source(hit: &Value, highlight: &BTreeSet<String>) -> Result<Value> {
    let mut source = match (hit.get("_source"), hit.get("fields")) {
        (Some(Value::Object(source)), _) => source.clone(),
        // SQL 翻译出的查询通常是 `_source: false` + `fields`
        (_, Some(Value::Object(fields))) => fields
            .iter()
            .map(|(name, values)| {
                let value = match values {
                    Value::Array(items) if items.len() == 1 => items[0].clone(),
                    other => other.clone(),
                };
                (name.clone(), value)
            })
            .collect(),
        _ => return Err(Error::decode("hit without _source or fields")),
    };

    if let Some(Value::Object(fragments)) = hit.get("highlight") {
        for field in highlight {
            if let Some(Value::Array(parts)) = fragments.get(field) {
                let joined: String = parts.iter().filter_map(Value::as_str).collect();
                source.insert(field.clone(), Value::String(joined));
            }
        }
    }
    Ok(Value::Object(source))
}

pub fn decode_count(response: &Value) -> Result<u64> {
    response
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::decode("missing field count"))
}

pub fn aggregations(response: &Value) -> Result<&Value> {
    response
        .get("aggregations")
        .ok_or_else(|| Error::decode("missing field aggregations"))
}

/// 把 `aggregations` 解码为 `T`。直接解码失败时依次尝试
/// 单个分桶聚合 `{key: doc_count}` 和指标 `{name: value}` 两种扁平形式
pub fn decode_aggregations<T: DeserializeOwned>(response: &Value) -> Result<T> {
    let aggs = aggregations(response)?;
    let direct = match serde_json::from_value::<T>(aggs.clone()) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    for flattened in [flatten_buckets(aggs), flatten_metrics(aggs)]
        .into_iter()
        .flatten()
    {
        if let Ok(value) = serde_json::from_value::<T>(flattened) {
            return Ok(value);
        }
    }
    Err(Error::decode(direct))
}

fn flatten_buckets(aggs: &Value) -> Option<Value> {
    let aggs = aggs.as_object()?;
    if aggs.len() != 1 {
        return None;
    }
    let (_, agg) = aggs.iter().next()?;
    let mut out = Map::new();
    match agg.get("buckets")? {
        Value::Array(buckets) => {
            for bucket in buckets {
                let key = match (bucket.get("key_as_string"), bucket.get("key")?) {
                    (Some(Value::String(s)), _) => s.clone(),
                    (_, Value::String(s)) => s.clone(),
                    (_, other) => other.to_string(),
                };
                out.insert(key, bucket.get("doc_count")?.clone());
            }
        }
        // keyed / filters 聚合
        Value::Object(buckets) => {
            for (key, bucket) in buckets {
                out.insert(key.clone(), bucket.get("doc_count")?.clone());
            }
        }
        _ => return None,
    }
    Some(Value::Object(out))
}

fn flatten_metrics(aggs: &Value) -> Option<Value> {
    aggs.as_object()?
        .iter()
        .map(|(name, agg)| Some((name.clone(), agg.get("value")?.clone())))
        .collect::<Option<Map<_, _>>>()
        .map(Value::Object)
}
