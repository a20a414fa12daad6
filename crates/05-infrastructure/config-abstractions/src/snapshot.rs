//! 配置快照定义

use crate::changeset::ChangeSet;
use crate::value::Value;
use infrastructure_common::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// 合并后配置的格式名称
pub const MERGED_FORMAT: &str = "json";

/// 合并后配置的来源名称
pub const MERGED_SOURCE: &str = "merged";

/// 配置快照
///
/// 某一版本的合并结果。发布后不可修改，持有者无需加锁即可读取。
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    change_set: ChangeSet,
    values: JsonValue,
}

impl Snapshot {
    /// 创建新的快照
    pub fn new(version: u64, change_set: ChangeSet, values: JsonValue) -> Self {
        Self {
            version,
            change_set,
            values,
        }
    }

    /// 创建版本号为 0 的空快照
    pub fn empty() -> Self {
        let values = JsonValue::Object(serde_json::Map::new());
        let change_set = ChangeSet::new(values.to_string(), MERGED_FORMAT, MERGED_SOURCE);
        Self::new(0, change_set, values)
    }

    /// 版本号
    pub fn version(&self) -> u64 {
        self.version
    }

    /// 合并后的变更集
    pub fn change_set(&self) -> &ChangeSet {
        &self.change_set
    }

    /// 合并后的原始字节
    pub fn bytes(&self) -> &[u8] {
        self.change_set.data()
    }

    /// 内容校验和
    pub fn checksum(&self) -> &str {
        self.change_set.checksum()
    }

    /// 解码后的配置树
    pub fn values(&self) -> &JsonValue {
        &self.values
    }

    /// 按路径获取配置值
    pub fn get(self: &Arc<Self>, path: &[&str]) -> Value {
        Value::new(Arc::clone(self), path.iter().map(|s| (*s).to_string()).collect())
    }

    /// 将整个配置树解码到指定类型
    pub fn scan<T>(&self) -> ConfigResult<T>
    where
        T: DeserializeOwned,
    {
        T::deserialize(&self.values).map_err(ConfigError::decode)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}
