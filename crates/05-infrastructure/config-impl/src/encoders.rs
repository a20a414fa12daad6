//! 配置编码器实现

use config_abstractions::Encoder;
use infrastructure_common::{ConfigError, ConfigResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// JSON 编码器
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, value: &Value) -> ConfigResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, data: &[u8]) -> ConfigResult<Value> {
        serde_json::from_slice(data).map_err(ConfigError::decode)
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// YAML 编码器
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlEncoder;

impl Encoder for YamlEncoder {
    fn encode(&self, value: &Value) -> ConfigResult<Vec<u8>> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(ConfigError::encode)
    }

    fn decode(&self, data: &[u8]) -> ConfigResult<Value> {
        serde_yaml::from_slice(data).map_err(ConfigError::decode)
    }

    fn name(&self) -> &str {
        "yaml"
    }
}

/// TOML 编码器
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlEncoder;

impl TomlEncoder {
    /// 将 TOML 值转换为 JSON 值
    fn toml_to_json(value: toml::Value) -> Value {
        match value {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(serde_json::Number::from(i)),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        }
    }
}

impl Encoder for TomlEncoder {
    fn encode(&self, value: &Value) -> ConfigResult<Vec<u8>> {
        toml::to_string(value)
            .map(String::into_bytes)
            .map_err(ConfigError::encode)
    }

    fn decode(&self, data: &[u8]) -> ConfigResult<Value> {
        let text = std::str::from_utf8(data).map_err(ConfigError::decode)?;
        let table: toml::Table = toml::from_str(text).map_err(ConfigError::decode)?;
        Ok(Self::toml_to_json(toml::Value::Table(table)))
    }

    fn name(&self) -> &str {
        "toml"
    }
}

const XML_TEXT_KEY: &str = "$text";

/// XML 编码器
///
/// 根元素名称在解码时忽略，编码时固定为 `config`
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlEncoder;

impl Encoder for XmlEncoder {
    fn encode(&self, value: &Value) -> ConfigResult<Vec<u8>> {
        quick_xml::se::to_string_with_root("config", value)
            .map(String::into_bytes)
            .map_err(ConfigError::encode)
    }

    fn decode(&self, data: &[u8]) -> ConfigResult<Value> {
        let text = std::str::from_utf8(data).map_err(ConfigError::decode)?;
        let value = quick_xml::de::from_str(text).map_err(ConfigError::decode)?;
        Ok(collapse_text(value))
    }

    fn name(&self) -> &str {
        "xml"
    }
}

/// 只有文本内容的元素折叠为字符串
fn collapse_text(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(text) = map.get(XML_TEXT_KEY) {
                    return text.clone();
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(key, child)| (key, collapse_text(child)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(collapse_text).collect()),
        other => other,
    }
}

/// HCL 编码器
#[derive(Debug, Default, Clone, Copy)]
pub struct HclEncoder;

impl Encoder for HclEncoder {
    fn encode(&self, value: &Value) -> ConfigResult<Vec<u8>> {
        hcl::to_vec(value).map_err(ConfigError::encode)
    }

    fn decode(&self, data: &[u8]) -> ConfigResult<Value> {
        hcl::from_slice(data).map_err(ConfigError::decode)
    }

    fn name(&self) -> &str {
        "hcl"
    }
}

/// 编码器注册表
///
/// 按格式名称查找编码器，默认包含 json、yaml/yml、toml、xml、hcl
#[derive(Clone)]
pub struct EncoderRegistry {
    encoders: HashMap<String, Arc<dyn Encoder>>,
}

impl std::fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

impl EncoderRegistry {
    /// 创建空的编码器注册表
    pub fn empty() -> Self {
        Self {
            encoders: HashMap::new(),
        }
    }

    /// 创建包含默认编码器的注册表
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonEncoder));
        registry.register(Arc::new(YamlEncoder));
        registry.register_as("yml", Arc::new(YamlEncoder));
        registry.register(Arc::new(TomlEncoder));
        registry.register(Arc::new(XmlEncoder));
        registry.register(Arc::new(HclEncoder));
        registry
    }

    /// 以编码器自身名称注册，同名编码器会被覆盖
    pub fn register(&mut self, encoder: Arc<dyn Encoder>) {
        let name = encoder.name().to_string();
        self.register_as(name, encoder);
    }

    /// 以指定格式名称注册
    pub fn register_as(&mut self, format: impl Into<String>, encoder: Arc<dyn Encoder>) {
        self.encoders.insert(format.into().to_lowercase(), encoder);
    }

    /// 查找编码器
    pub fn get(&self, format: &str) -> ConfigResult<Arc<dyn Encoder>> {
        self.encoders
            .get(&format.to_lowercase())
            .cloned()
            .ok_or_else(|| ConfigError::UnsupportedFormat {
                format: format.to_string(),
            })
    }

    /// 是否注册了指定格式
    pub fn contains(&self, format: &str) -> bool {
        self.encoders.contains_key(&format.to_lowercase())
    }

    /// 已注册的格式名称（排序后）
    pub fn formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.encoders.keys().cloned().collect();
        formats.sort();
        formats
    }
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
