use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Search,
    Count,
    Aggregation,
    Bulk,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Search => "search",
            OperationKind::Count => "count",
            OperationKind::Aggregation => "aggregation",
            OperationKind::Bulk => "bulk",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// 解析 `price:desc,name` 形式的排序声明，未写方向时默认升序
    pub fn parse_list(spec: &str) -> Vec<SortField> {
        spec.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|item| match item.rsplit_once(':') {
                Some((field, dir)) if dir.trim().eq_ignore_ascii_case("desc") => {
                    SortField::desc(field.trim())
                }
                Some((field, dir)) if dir.trim().eq_ignore_ascii_case("asc") => {
                    SortField::asc(field.trim())
                }
                _ => SortField::asc(item),
            })
            .collect()
    }
}

/// 查询模板，两种形式互斥
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryTemplate {
    Native(String),
    Sql(String),
}

impl QueryTemplate {
    pub fn text(&self) -> &str {
        match self {
            QueryTemplate::Native(t) | QueryTemplate::Sql(t) => t,
        }
    }
}

/// 模板来源，文件只在注册时读取一次
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateSource {
    Native(String),
    Sql(String),
    NativeFile(PathBuf),
    SqlFile(PathBuf),
}

impl TemplateSource {
    fn load(&self) -> Result<QueryTemplate> {
        let read = |path: &PathBuf| {
            std::fs::read_to_string(path).map_err(|source| Error::TemplateFile {
                path: path.clone(),
                source,
            })
        };
        Ok(match self {
            TemplateSource::Native(t) => QueryTemplate::Native(t.clone()),
            TemplateSource::Sql(t) => QueryTemplate::Sql(t.clone()),
            TemplateSource::NativeFile(p) => QueryTemplate::Native(read(p)?),
            TemplateSource::SqlFile(p) => QueryTemplate::Sql(read(p)?),
        })
    }
}

/// 单个方法的静态声明，手写或由 `#[mapper]` 生成
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDecl {
    pub method: String,
    pub template: Option<TemplateSource>,
    pub collection: Option<String>,
    pub kind: OperationKind,
    pub paginated: bool,
    pub page_size: Option<u32>,
    pub offset: Option<u32>,
    pub sort: Vec<SortField>,
    pub highlight: Vec<String>,
    pub timeout_ms: Option<u64>,
}

impl MethodDecl {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            template: None,
            collection: None,
            kind: OperationKind::Search,
            paginated: false,
            page_size: None,
            offset: None,
            sort: Vec::new(),
            highlight: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn native(mut self, template: impl Into<String>) -> Self {
        self.template = Some(TemplateSource::Native(template.into()));
        self
    }

    pub fn sql(mut self, template: impl Into<String>) -> Self {
        self.template = Some(TemplateSource::Sql(template.into()));
        self
    }

    pub fn template(mut self, source: TemplateSource) -> Self {
        self.template = Some(source);
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn paginated(mut self, page_size: u32, offset: u32) -> Self {
        self.paginated = true;
        self.page_size = Some(page_size);
        self.offset = Some(offset);
        self
    }

    pub fn sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    pub fn highlight<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.highlight = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// 一个映射接口的声明表
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub interface: String,
    pub default_collection: Option<String>,
    pub methods: Vec<MethodDecl>,
}

impl InterfaceSpec {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            default_collection: None,
            methods: Vec::new(),
        }
    }

    pub fn default_collection(mut self, collection: impl Into<String>) -> Self {
        self.default_collection = Some(collection.into());
        self
    }

    pub fn method(mut self, decl: MethodDecl) -> Self {
        self.methods.push(decl);
        self
    }
}

/// 校验后的方法元信息，不可变
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub interface: String,
    pub method: String,
    pub template: QueryTemplate,
    pub collection: String,
    pub kind: OperationKind,
    pub paginated: bool,
    pub default_page_size: u32,
    pub default_offset: u32,
    pub sort: Vec<SortField>,
    pub highlight_fields: BTreeSet<String>,
    pub timeout: Duration,
}

impl QueryDescriptor {
    pub(crate) fn build(
        interface: &str,
        default_collection: Option<&str>,
        decl: &MethodDecl,
    ) -> Result<Self> {
        let missing_template = || Error::MissingTemplate {
            interface: interface.to_string(),
            method: decl.method.clone(),
        };

        let template = decl.template.as_ref().ok_or_else(missing_template)?.load()?;
        if template.text().trim().is_empty() {
            return Err(missing_template());
        }

        let collection = decl
            .collection
            .as_deref()
            .or(default_collection)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::MissingCollection {
                interface: interface.to_string(),
                method: decl.method.clone(),
            })?;

        let default_page_size = decl.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if decl.paginated && default_page_size == 0 {
            return Err(Error::InvalidPagination {
                from: decl.offset.unwrap_or(0) as i64,
                size: 0,
            });
        }

        Ok(Self {
            interface: interface.to_string(),
            method: decl.method.clone(),
            template,
            collection: collection.to_string(),
            kind: decl.kind,
            paginated: decl.paginated,
            default_page_size,
            default_offset: decl.offset.unwrap_or(0),
            sort: decl.sort.clone(),
            highlight_fields: decl.highlight.iter().cloned().collect(),
            timeout: Duration::from_millis(decl.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
        })
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}
