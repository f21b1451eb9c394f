use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock, RwLock};

use crate::{
    MapperMeta,
    descriptor::{InterfaceSpec, QueryDescriptor},
    error::{Error, Result},
};

#[derive(Debug, PartialEq, Eq)]
pub struct MapperEntry {
    pub interface: String,
    pub default_collection: Option<String>,
    /// 按声明顺序排列
    pub descriptors: Vec<Arc<QueryDescriptor>>,
}

impl MapperEntry {
    fn build(spec: &InterfaceSpec) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(spec.methods.len());
        for decl in &spec.methods {
            if !seen.insert(decl.method.as_str()) {
                return Err(Error::DuplicateMethod {
                    interface: spec.interface.clone(),
                    method: decl.method.clone(),
                });
            }
            descriptors.push(Arc::new(QueryDescriptor::build(
                &spec.interface,
                spec.default_collection.as_deref(),
                decl,
            )?));
        }
        Ok(Self {
            interface: spec.interface.clone(),
            default_collection: spec.default_collection.clone(),
            descriptors,
        })
    }

    pub fn descriptor(&self, method: &str) -> Option<&Arc<QueryDescriptor>> {
        self.descriptors.iter().find(|d| d.method == method)
    }
}

type Snapshot = Arc<HashMap<String, Arc<MapperEntry>>>;

/// 接口名 → 描述符。每次写入都构建完整的新表再整体替换，读者只会看到注册完成的接口
#[derive(Default)]
pub struct MapperRegistry {
    entries: RwLock<Snapshot>,
}

static GLOBAL: LazyLock<Arc<MapperRegistry>> = LazyLock::new(|| Arc::new(MapperRegistry::default()));

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级共享的注册表
    pub fn global() -> Arc<MapperRegistry> {
        GLOBAL.clone()
    }

    /// 从链接进来的所有 `#[mapper]` 接口构建注册表
    pub fn from_inventory() -> Result<Self> {
        let registry = Self::new();
        registry.scan()?;
        Ok(registry)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, next: HashMap<String, Arc<MapperEntry>>) {
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
    }

    pub fn register(&self, spec: InterfaceSpec) -> Result<Arc<MapperEntry>> {
        let entry = Arc::new(MapperEntry::build(&spec)?);
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::clone(&guard);
        next.insert(entry.interface.clone(), entry.clone());
        *guard = Arc::new(next);
        log::debug!(
            "registered mapper {} ({} methods)",
            entry.interface,
            entry.descriptors.len()
        );
        Ok(entry)
    }

    /// 全部校验通过后一次性发布
    pub fn register_all<I>(&self, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = InterfaceSpec>,
    {
        let built = specs
            .into_iter()
            .map(|spec| MapperEntry::build(&spec).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::clone(&guard);
        for entry in built {
            next.insert(entry.interface.clone(), entry);
        }
        *guard = Arc::new(next);
        Ok(())
    }

    /// 从 inventory 重新构建整个注册表，旧条目全部替换
    pub fn scan(&self) -> Result<()> {
        let mut next = HashMap::new();
        for meta in inventory::iter::<MapperMeta>() {
            let entry = MapperEntry::build(&(meta.interface_spec)())?;
            next.insert(entry.interface.clone(), Arc::new(entry));
        }
        log::debug!("scanned {} mapper interfaces", next.len());
        self.publish(next);
        Ok(())
    }

    pub fn entry(&self, interface: &str) -> Option<Arc<MapperEntry>> {
        self.snapshot().get(interface).cloned()
    }

    pub fn contains(&self, interface: &str) -> bool {
        self.snapshot().contains_key(interface)
    }

    pub fn lookup(&self, interface: &str, method: &str) -> Result<Arc<QueryDescriptor>> {
        self.entry(interface)
            .and_then(|entry| entry.descriptor(method).cloned())
            .ok_or_else(|| Error::UnmappedMethod {
                interface: interface.to_string(),
                method: method.to_string(),
            })
    }

    pub fn interfaces(&self) -> Vec<String> {
        let mut names: Vec<_> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }
}
