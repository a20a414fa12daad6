//! 环境变量配置源

use crate::reader::merge_values;
use async_trait::async_trait;
use config_abstractions::{ChangeSet, ConfigSource};
use infrastructure_common::ConfigResult;
use serde_json::{Map, Value};
use tracing::debug;

const SOURCE_NAME: &str = "env";

/// 环境变量配置源
///
/// 环境变量名按分隔符拆分并转为小写，形成嵌套配置，
/// 例如 `AMQP_HOST=rabbit` 对应 `{"amqp": {"host": "rabbit"}}`
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefixes: Vec<String>,
    stripped_prefixes: Vec<String>,
    separator: String,
}

impl EnvSource {
    /// 创建新的环境变量配置源，默认读取全部环境变量
    pub fn new() -> Self {
        Self {
            prefixes: Vec::new(),
            stripped_prefixes: Vec::new(),
            separator: "_".to_string(),
        }
    }

    /// 只读取带指定前缀的变量，前缀保留在配置键中
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// 只读取带指定前缀的变量，并从配置键中去掉前缀
    pub fn with_stripped_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stripped_prefixes.push(prefix.into());
        self
    }

    /// 设置分隔符
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// 获取分隔符
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// 前缀转为大写并以分隔符结尾，在读取时按当前分隔符处理
    fn normalize_prefixes(&self, prefixes: &[String]) -> Vec<String> {
        prefixes
            .iter()
            .map(|prefix| {
                let mut prefix = prefix.to_uppercase();
                if !prefix.ends_with(&self.separator) {
                    prefix.push_str(&self.separator);
                }
                prefix
            })
            .collect()
    }

    /// 将环境变量转换为配置树
    pub fn build_values<I>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: Vec<(String, String)> = vars.into_iter().collect();
        vars.sort();

        let prefixes = self.normalize_prefixes(&self.prefixes);
        let stripped_prefixes = self.normalize_prefixes(&self.stripped_prefixes);
        let filtered = !prefixes.is_empty() || !stripped_prefixes.is_empty();
        let mut root = Value::Object(Map::new());

        for (name, value) in vars {
            let key = if filtered {
                if let Some(stripped) = stripped_prefixes
                    .iter()
                    .find_map(|p| name.strip_prefix(p.as_str()))
                {
                    stripped
                } else if prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                    name.as_str()
                } else {
                    continue;
                }
            } else {
                name.as_str()
            };

            let segments: Vec<String> = key
                .to_lowercase()
                .split(self.separator.as_str())
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect();
            if segments.is_empty() {
                continue;
            }

            let nested = segments
                .into_iter()
                .rev()
                .fold(parse_scalar(&value), |inner, segment| {
                    let mut map = Map::new();
                    map.insert(segment, inner);
                    Value::Object(map)
                });
            merge_values(&mut root, nested);
        }

        root
    }
}

/// 当前进程的环境变量，跳过名称或值不是合法 UTF-8 的变量
fn process_vars() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(name, value)| {
        match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (name, _) => {
                debug!("跳过非 UTF-8 环境变量: {:?}", name);
                None
            }
        }
    })
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

/// 尝试将变量值解析为布尔、整数或浮点数
fn parse_scalar(value: &str) -> Value {
    if let Ok(bool_val) = value.parse::<bool>() {
        Value::Bool(bool_val)
    } else if let Ok(int_val) = value.parse::<i64>() {
        Value::Number(serde_json::Number::from(int_val))
    } else if let Some(number) = value
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
    {
        Value::Number(number)
    } else {
        Value::String(value.to_string())
    }
}

#[async_trait]
impl ConfigSource for EnvSource {
    async fn read(&self) -> ConfigResult<ChangeSet> {
        let values = self.build_values(process_vars());
        debug!(
            "读取环境变量完成, 顶层键数量: {}",
            values.as_object().map_or(0, |map| map.len())
        );
        Ok(ChangeSet::new(serde_json::to_vec(&values)?, "json", SOURCE_NAME))
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}
