//! 类型化配置值

use crate::snapshot::Snapshot;
use infrastructure_common::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// 配置值
///
/// 绑定到某个快照中的一条路径。路径在读取时才解析，
/// 路径不存在或类型不匹配时各访问方法返回调用方给出的默认值。
#[derive(Debug, Clone)]
pub struct Value {
    snapshot: Arc<Snapshot>,
    path: Vec<String>,
}

impl Value {
    /// 创建绑定到指定快照与路径的配置值
    pub fn new(snapshot: Arc<Snapshot>, path: Vec<String>) -> Self {
        Self { snapshot, path }
    }

    /// 所属快照
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// 绑定的路径
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// 获取子路径上的配置值
    pub fn get(&self, path: &[&str]) -> Value {
        let mut full = self.path.clone();
        full.extend(path.iter().map(|s| (*s).to_string()));
        Value::new(Arc::clone(&self.snapshot), full)
    }

    /// 路径是否存在
    pub fn exists(&self) -> bool {
        self.resolve().is_some()
    }

    /// 字符串值
    pub fn string(&self, default: &str) -> String {
        match self.resolve() {
            Some(JsonValue::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    /// 整数值，字符串形式的整数同样可以转换
    pub fn int(&self, default: i64) -> i64 {
        match self.resolve() {
            Some(JsonValue::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(default),
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// 布尔值，字符串 "true"/"false" 同样可以转换
    pub fn bool(&self, default: bool) -> bool {
        match self.resolve() {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// 浮点值
    pub fn float(&self, default: f64) -> f64 {
        match self.resolve() {
            Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(default),
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// 映射值
    pub fn map(&self, default: Map<String, JsonValue>) -> Map<String, JsonValue> {
        match self.resolve() {
            Some(JsonValue::Object(map)) => map.clone(),
            _ => default,
        }
    }

    /// 字符串列表
    ///
    /// 逗号分隔的字符串会被拆分，数组中只要有非字符串元素即返回默认值
    pub fn string_slice(&self, default: Vec<String>) -> Vec<String> {
        match self.resolve() {
            Some(JsonValue::String(s)) if s.contains(',') => {
                s.split(',').map(str::to_string).collect()
            }
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .unwrap_or(default),
            _ => default,
        }
    }

    /// 字符串映射，值必须全部为字符串
    pub fn string_map(&self, default: HashMap<String, String>) -> HashMap<String, String> {
        match self.resolve() {
            Some(JsonValue::Object(map)) => map
                .iter()
                .map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect::<Option<HashMap<_, _>>>()
                .unwrap_or(default),
            _ => default,
        }
    }

    /// 原始字节，字符串返回其内容，其他类型返回 JSON 编码
    pub fn bytes(&self) -> Vec<u8> {
        match self.resolve() {
            Some(JsonValue::String(s)) => s.clone().into_bytes(),
            Some(other) => serde_json::to_vec(other).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// 解码到指定类型
    ///
    /// 路径不存在时返回 `T::default()`，结构不匹配时返回 [`ConfigError::DecodeError`]
    pub fn scan<T>(&self) -> ConfigResult<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.resolve() {
            Some(node) => T::deserialize(node).map_err(ConfigError::decode),
            None => Ok(T::default()),
        }
    }

    fn resolve(&self) -> Option<&JsonValue> {
        let mut current = self.snapshot.values();
        for part in &self.path {
            current = match current {
                JsonValue::Object(map) => map.get(part)?,
                JsonValue::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}
