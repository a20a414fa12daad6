//! 配置读取与合并

use crate::encoders::EncoderRegistry;
use config_abstractions::{ChangeSet, Encoder, MERGED_FORMAT, MERGED_SOURCE};
use infrastructure_common::ConfigResult;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("环境变量占位符正则无效"));

/// 读取器选项
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    encoders: EncoderRegistry,
    disable_replace_env_vars: bool,
}

impl ReaderOptions {
    /// 创建默认选项
    pub fn new() -> Self {
        Self {
            encoders: EncoderRegistry::new(),
            disable_replace_env_vars: false,
        }
    }

    /// 注册或覆盖编码器
    pub fn with_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoders.register(encoder);
        self
    }

    /// 替换整个编码器注册表
    pub fn with_encoders(mut self, encoders: EncoderRegistry) -> Self {
        self.encoders = encoders;
        self
    }

    /// 禁用环境变量插值
    pub fn with_disable_replace_env_vars(mut self) -> Self {
        self.disable_replace_env_vars = true;
        self
    }

    /// 编码器注册表
    pub fn encoders(&self) -> &EncoderRegistry {
        &self.encoders
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// 配置读取器
///
/// 解码各个变更集，按顺序深度合并为一个配置树。合并规则：
/// 两个映射逐键递归合并，其余任何组合都由后者整体替换前者。
#[derive(Debug, Clone, Default)]
pub struct Reader {
    options: ReaderOptions,
}

impl Reader {
    /// 创建新的读取器
    pub fn new(options: ReaderOptions) -> Self {
        Self { options }
    }

    /// 读取器选项
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// 按顺序合并多个变更集
    pub fn merge<'a, I>(&self, change_sets: I) -> ConfigResult<ChangeSet>
    where
        I: IntoIterator<Item = &'a ChangeSet>,
    {
        self.merge_tree(change_sets).map(|(change_set, _)| change_set)
    }

    /// 合并并同时返回合并后的配置树
    pub fn merge_tree<'a, I>(&self, change_sets: I) -> ConfigResult<(ChangeSet, Value)>
    where
        I: IntoIterator<Item = &'a ChangeSet>,
    {
        let mut merged = Value::Object(Map::new());
        let mut count = 0usize;
        for change_set in change_sets {
            let values = self.values(change_set)?;
            merge_values(&mut merged, values);
            count += 1;
        }

        let data = serde_json::to_vec(&merged)?;
        let change_set = ChangeSet::new(data, MERGED_FORMAT, MERGED_SOURCE);
        debug!(
            "合并 {} 个变更集完成, 校验和: {}",
            count,
            change_set.checksum()
        );
        Ok((change_set, merged))
    }

    /// 解码单个变更集，并按需进行环境变量插值
    pub fn values(&self, change_set: &ChangeSet) -> ConfigResult<Value> {
        let encoder = self.options.encoders.get(change_set.format())?;
        let mut values = if change_set.data().iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            encoder.decode(change_set.data())?
        };

        if !self.options.disable_replace_env_vars {
            replace_env_vars(&mut values);
        }
        Ok(values)
    }
}

/// 将 overlay 深度合并到 base
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

/// 替换所有字符串标量中的 `${NAME}` 占位符，未设置的变量替换为空串
pub fn replace_env_vars(value: &mut Value) {
    match value {
        Value::String(s) => {
            if ENV_VAR_PATTERN.is_match(s) {
                let replaced = ENV_VAR_PATTERN.replace_all(s, |caps: &Captures<'_>| {
                    std::env::var(&caps[1]).unwrap_or_default()
                });
                *s = replaced.into_owned();
            }
        }
        Value::Array(items) => items.iter_mut().for_each(replace_env_vars),
        Value::Object(map) => map.values_mut().for_each(replace_env_vars),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure_common::ConfigError;
    use serde_json::json;

    fn json_change_set(value: &Value) -> ChangeSet {
        ChangeSet::new(value.to_string(), "json", "memory")
    }

    #[test]
    fn test_later_overrides_earlier() {
        let reader = Reader::default();
        let (_, merged) = reader
            .merge_tree(&[
                json_change_set(&json!({"a": 1, "b": 2})),
                json_change_set(&json!({"a": 9})),
            ])
            .unwrap();
        assert_eq!(merged, json!({"a": 9, "b": 2}));
    }

    #[test]
    fn test_maps_merge_recursively_and_sequences_replace() {
        let reader = Reader::default();
        let (_, merged) = reader
            .merge_tree(&[
                json_change_set(&json!({
                    "amqp": {"host": "rabbit.platform", "port": 80},
                    "hosts": ["a", "b"],
                    "handler": {"exchange": "springCloudBus"},
                })),
                json_change_set(&json!({
                    "amqp": {"host": "rabbit.testing.com"},
                    "hosts": ["c"],
                    "handler": "disabled",
                })),
            ])
            .unwrap();

        assert_eq!(
            merged,
            json!({
                "amqp": {"host": "rabbit.testing.com", "port": 80},
                "hosts": ["c"],
                "handler": "disabled",
            })
        );
    }

    #[test]
    fn test_merge_is_deterministic_and_order_independent_within_input() {
        let reader = Reader::default();
        let first = ChangeSet::new(r#"{"b": 2, "a": {"y": 1, "x": 2}}"#, "json", "memory");
        let second = ChangeSet::new(r#"{"a": {"x": 2, "y": 1}, "b": 2}"#, "json", "memory");

        let once = reader.merge(&[first.clone()]).unwrap();
        let twice = reader.merge(&[first]).unwrap();
        let reordered = reader.merge(&[second]).unwrap();

        assert_eq!(once.checksum(), twice.checksum());
        assert_eq!(once.data(), twice.data());
        assert_eq!(once.checksum(), reordered.checksum());
        assert_eq!(once.data(), br#"{"a":{"x":2,"y":1},"b":2}"#);
    }

    #[test]
    fn test_mixed_formats() {
        let reader = Reader::default();
        let (change_set, merged) = reader
            .merge_tree(&[
                ChangeSet::new("server:\n  port: 80\n", "yaml", "file"),
                ChangeSet::new("[server]\nhost = \"localhost\"\n", "toml", "file"),
            ])
            .unwrap();

        assert_eq!(merged, json!({"server": {"port": 80, "host": "localhost"}}));
        assert_eq!(change_set.format(), "json");
        assert_eq!(change_set.source(), "merged");
    }

    #[test]
    fn test_unsupported_format() {
        let reader = Reader::default();
        let result = reader.merge(&[ChangeSet::new("a=1", "ini", "file")]);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_empty_input_yields_empty_object() {
        let reader = Reader::default();
        let merged = reader.merge(&[ChangeSet::new("  \n", "json", "file")]).unwrap();
        assert_eq!(merged.data(), b"{}");
    }

    #[test]
    fn test_env_var_interpolation() {
        std::env::set_var("LORN_READER_TEST_HOST", "rabbit.env");
        let change_set = json_change_set(&json!({
            "amqp": {"host": "${LORN_READER_TEST_HOST}", "url": "amqp://${LORN_READER_TEST_HOST}:5672"},
            "missing": "${LORN_READER_TEST_UNSET}",
        }));

        let values = Reader::default().values(&change_set).unwrap();
        assert_eq!(values["amqp"]["host"], "rabbit.env");
        assert_eq!(values["amqp"]["url"], "amqp://rabbit.env:5672");
        assert_eq!(values["missing"], "");

        let reader = Reader::new(ReaderOptions::new().with_disable_replace_env_vars());
        let raw = reader.values(&change_set).unwrap();
        assert_eq!(raw["amqp"]["host"], "${LORN_READER_TEST_HOST}");
    }

    #[test]
    fn test_custom_encoder_registration() {
        struct UpperJson;

        impl Encoder for UpperJson {
            fn encode(&self, value: &Value) -> ConfigResult<Vec<u8>> {
                Ok(serde_json::to_vec(value)?)
            }

            fn decode(&self, data: &[u8]) -> ConfigResult<Value> {
                let text = String::from_utf8_lossy(data).to_uppercase();
                serde_json::from_str(&text).map_err(ConfigError::decode)
            }

            fn name(&self) -> &str {
                "upper"
            }
        }

        let reader = Reader::new(ReaderOptions::new().with_encoder(Arc::new(UpperJson)));
        let merged = reader
            .merge_tree(&[ChangeSet::new(r#"{"key": "value"}"#, "upper", "memory")])
            .unwrap()
            .1;
        assert_eq!(merged, json!({"KEY": "VALUE"}));
    }
}
