use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterBinding {
    pub name: String,
    pub value: Value,
}

/// 一次调用的参数，按声明顺序
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    bindings: Vec<ParameterBinding>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个绑定，重名报错
    pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> Result<Self> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(Error::DuplicateParameterName(name));
        }
        self.bindings.push(ParameterBinding {
            name,
            value: to_param(&value)?,
        });
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.value)
    }

    /// 支持 `page.from` 这样的点号路径
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn bindings(&self) -> &[ParameterBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// 读取整数参数，缺省或为 null 时返回 `default`
    pub(crate) fn int_or(&self, name: &str, default: i64) -> Result<i64> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => {
                serde_json::from_value::<i64>(value.clone()).map_err(Error::InvalidParameter)
            }
        }
    }
}

pub fn to_param<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(Error::InvalidParameter)
}

pub fn bind(names: &[&str], values: Vec<Value>) -> Result<Params> {
    if names.len() != values.len() {
        return Err(Error::ArityMismatch {
            expected: names.len(),
            actual: values.len(),
        });
    }
    let mut seen = HashSet::with_capacity(names.len());
    let mut bindings = Vec::with_capacity(names.len());
    for (name, value) in names.iter().zip(values) {
        if !seen.insert(*name) {
            return Err(Error::DuplicateParameterName(name.to_string()));
        }
        bindings.push(ParameterBinding {
            name: name.to_string(),
            value,
        });
    }
    Ok(Params { bindings })
}
