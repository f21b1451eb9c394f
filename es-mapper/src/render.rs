use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::{
    binder::Params,
    error::{Error, Result},
};

static NATIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\{\s*(?P<name>[A-Za-z_]\w*(?:\.\w+)*)\s*\}|(?P<bad>#\{)")
        .expect("placeholder pattern")
});

// 字面量放在最前面，保证字面量内部的 `?` 不会被当作位置参数
static SQL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<lit>'(?:[^']|'')*')|#\{\s*(?P<name>[A-Za-z_]\w*(?:\.\w+)*)\s*\}|(?P<bad>#\{)|(?P<pos>\?)",
    )
    .expect("sql placeholder pattern")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Native,
    Sql,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Context {
    Native,
    SqlBare,
    SqlLiteral,
}

struct Renderer<'a> {
    params: &'a Params,
    cache: HashMap<(String, Context), String>,
    next_positional: usize,
}

/// 替换模板中所有 `#{name}`；SQL 模式下字面量外的 `?` 按声明顺序取参数
pub fn render(template: &str, params: &Params, mode: RenderMode) -> Result<String> {
    let mut renderer = Renderer {
        params,
        cache: HashMap::new(),
        next_positional: 0,
    };
    match mode {
        RenderMode::Native => renderer.render_with(&NATIVE_PATTERN, template, Context::Native),
        RenderMode::Sql => renderer.render_with(&SQL_PATTERN, template, Context::SqlBare),
    }
}

impl Renderer<'_> {
    fn render_with(&mut self, pattern: &Regex, template: &str, context: Context) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in pattern.captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            out.push_str(&self.substitute(&caps, context)?);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    fn substitute(&mut self, caps: &Captures<'_>, context: Context) -> Result<String> {
        if let Some(lit) = caps.name("lit") {
            return self.render_with(&NATIVE_PATTERN, lit.as_str(), Context::SqlLiteral);
        }
        if let Some(name) = caps.name("name") {
            return self.named(name.as_str(), context);
        }
        if let Some(bad) = caps.name("bad") {
            return Err(Error::InvalidTemplate(format!(
                "malformed placeholder at byte {}",
                bad.start()
            )));
        }
        let index = self.next_positional;
        self.next_positional += 1;
        let binding = self
            .params
            .bindings()
            .get(index)
            .ok_or_else(|| Error::MissingParameter(format!("?{}", index + 1)))?;
        encode(&binding.value, context)
    }

    fn named(&mut self, name: &str, context: Context) -> Result<String> {
        let key = (name.to_string(), context);
        if let Some(rendered) = self.cache.get(&key) {
            return Ok(rendered.clone());
        }
        let value = self
            .params
            .resolve(name)
            .ok_or_else(|| Error::MissingParameter(name.to_string()))?;
        let rendered = encode(value, context)?;
        self.cache.insert(key, rendered.clone());
        Ok(rendered)
    }
}

fn encode(value: &Value, context: Context) -> Result<String> {
    let json = || serde_json::to_string(value).map_err(Error::InvalidParameter);
    Ok(match (value, context) {
        (Value::String(s), Context::Native) => s.clone(),
        (Value::String(s), Context::SqlBare) => format!("'{}'", s.replace('\'', "''")),
        (Value::String(s), Context::SqlLiteral) => s.replace('\'', "''"),
        (_, Context::SqlLiteral) => json()?.replace('\'', "''"),
        _ => json()?,
    })
}
