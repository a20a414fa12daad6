//! 键值存储配置源
//!
//! 键按 `/` 拆分为配置路径，值按 JSON 解析，解析失败时作为字符串保存。
//! 具体的存储后端通过 [`KvClient`] 接入。

use crate::reader::merge_values;
use async_trait::async_trait;
use config_abstractions::{ChangeSet, ConfigSource, SourceWatcher};
use infrastructure_common::{ConfigError, ConfigResult};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 默认键前缀
pub const DEFAULT_PREFIX: &str = "/hipaas/config/";

/// 键值对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// 完整键名
    pub key: String,
    /// 原始值
    pub value: Vec<u8>,
}

/// 键值变更事件流
#[async_trait]
pub trait KvWatchStream: Send {
    /// 等待下一批变更，返回发生变更的键
    async fn next_event(&mut self) -> ConfigResult<Vec<String>>;
}

/// 键值存储客户端
#[async_trait]
pub trait KvClient: Send + Sync {
    /// 读取前缀下的全部键值
    async fn get_prefix(&self, prefix: &str) -> ConfigResult<Vec<KeyValue>>;

    /// 监控前缀下的变更
    async fn watch_prefix(&self, prefix: &str) -> ConfigResult<Box<dyn KvWatchStream>>;

    /// 写入单个键
    async fn put(&self, key: &str, value: Vec<u8>) -> ConfigResult<()>;

    /// 关闭连接
    async fn close(&self) -> ConfigResult<()> {
        Ok(())
    }
}

/// 键值配置源选项
#[derive(Debug, Clone)]
pub struct KvOptions {
    addresses: Vec<String>,
    auth: Option<(String, String)>,
    dial_timeout: Duration,
    prefix: String,
    strip_prefix: bool,
}

impl KvOptions {
    /// 创建默认选项
    pub fn new() -> Self {
        Self {
            addresses: Vec::new(),
            auth: None,
            dial_timeout: Duration::from_secs(5),
            prefix: DEFAULT_PREFIX.to_string(),
            strip_prefix: false,
        }
    }

    /// 添加服务地址，可多次调用
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// 设置认证信息
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((username.into(), password.into()));
        self
    }

    /// 设置连接超时
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// 设置键前缀
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// 构建配置树时去掉键前缀
    pub fn with_strip_prefix(mut self) -> Self {
        self.strip_prefix = true;
        self
    }

    /// 服务地址，未设置时为 `127.0.0.1:2379`
    pub fn addresses(&self) -> Vec<String> {
        if self.addresses.is_empty() {
            vec!["127.0.0.1:2379".to_string()]
        } else {
            self.addresses.clone()
        }
    }

    /// 认证信息（用户名, 密码）
    pub fn auth(&self) -> Option<(&str, &str)> {
        self.auth.as_ref().map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// 连接超时
    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// 键前缀
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 是否去掉键前缀
    pub fn strip_prefix(&self) -> bool {
        self.strip_prefix
    }
}

impl Default for KvOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// 键值存储配置源
pub struct KvSource {
    client: Arc<dyn KvClient>,
    options: KvOptions,
    name: String,
}

impl std::fmt::Debug for KvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSource")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

impl KvSource {
    /// 创建新的键值配置源
    pub fn new(client: Arc<dyn KvClient>, options: KvOptions) -> Self {
        let name = format!("kv:{}", options.prefix());
        Self {
            client,
            options,
            name,
        }
    }

    /// 配置源选项
    pub fn options(&self) -> &KvOptions {
        &self.options
    }

    /// 将键值列表转换为配置树
    pub fn build_values(&self, pairs: &[KeyValue]) -> Value {
        let mut sorted: Vec<&KeyValue> = pairs.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        let mut root = Value::Object(Map::new());
        for pair in sorted {
            let key = if self.options.strip_prefix {
                pair.key
                    .strip_prefix(self.options.prefix())
                    .unwrap_or(&pair.key)
            } else {
                pair.key.as_str()
            };

            let leaf = serde_json::from_slice(&pair.value)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&pair.value).into_owned()));

            let segments: Vec<&str> = key
                .trim_matches('/')
                .split('/')
                .filter(|segment| !segment.is_empty())
                .collect();
            let nested = segments.into_iter().rev().fold(leaf, |inner, segment| {
                let mut map = Map::new();
                map.insert(segment.to_string(), inner);
                Value::Object(map)
            });
            merge_values(&mut root, nested);
        }
        root
    }

    async fn read_values(&self) -> ConfigResult<ChangeSet> {
        let pairs = self
            .client
            .get_prefix(self.options.prefix())
            .await
            .map_err(|e| ConfigError::source_read(&self.name, e))?;
        debug!("读取键值配置 {}, 键数量: {}", self.name, pairs.len());
        let values = self.build_values(&pairs);
        Ok(ChangeSet::new(
            serde_json::to_vec(&values)?,
            "json",
            self.name.as_str(),
        ))
    }
}

/// 将配置树展开为叶子键值对
fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}/{key}")
                };
                flatten(&path, child, out);
            }
        }
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
}

#[async_trait]
impl ConfigSource for KvSource {
    async fn read(&self) -> ConfigResult<ChangeSet> {
        self.read_values().await
    }

    async fn watch(&self) -> ConfigResult<Box<dyn SourceWatcher>> {
        let stream = self.client.watch_prefix(self.options.prefix()).await?;
        Ok(Box::new(KvSourceWatcher {
            source: KvSource {
                client: Arc::clone(&self.client),
                options: self.options.clone(),
                name: self.name.clone(),
            },
            stream: Some(stream),
            last_checksum: None,
        }))
    }

    async fn write(&self, change_set: &ChangeSet) -> ConfigResult<()> {
        let values: Value =
            serde_json::from_slice(change_set.data()).map_err(ConfigError::decode)?;
        let mut leaves = Vec::new();
        flatten("", &values, &mut leaves);

        let base = self.options.prefix().trim_end_matches('/');
        for (path, leaf) in leaves {
            let key = if path.is_empty() {
                base.to_string()
            } else {
                format!("{base}/{path}")
            };
            self.client.put(&key, serde_json::to_vec(&leaf)?).await?;
        }
        info!("写回键值配置: {}", self.name);
        Ok(())
    }

    async fn close(&self) -> ConfigResult<()> {
        self.client.close().await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_hot_reload(&self) -> bool {
        true
    }
}

/// 键值配置源监控器，每次收到事件后重新读取整个前缀
struct KvSourceWatcher {
    source: KvSource,
    stream: Option<Box<dyn KvWatchStream>>,
    last_checksum: Option<String>,
}

#[async_trait]
impl SourceWatcher for KvSourceWatcher {
    async fn next(&mut self) -> ConfigResult<ChangeSet> {
        loop {
            let stream = self.stream.as_mut().ok_or(ConfigError::Closed)?;
            let keys = stream.next_event().await?;
            debug!("键值配置变更: {:?}", keys);

            let change_set = self.source.read_values().await?;
            if self.last_checksum.as_deref() == Some(change_set.checksum()) {
                continue;
            }
            self.last_checksum = Some(change_set.checksum().to_string());
            return Ok(change_set);
        }
    }

    async fn stop(&mut self) -> ConfigResult<()> {
        self.stream = None;
        Ok(())
    }
}

/// 进程内键值存储客户端
///
/// 用于测试以及没有外部存储的单机部署
#[derive(Debug, Clone)]
pub struct InMemoryKvClient {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    events: broadcast::Sender<String>,
}

impl InMemoryKvClient {
    /// 创建空的存储
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            events,
        }
    }

    /// 写入键值并通知监控者
    pub fn set(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        self.entries.write().insert(key.clone(), value.into());
        let _ = self.events.send(key);
    }

    /// 删除键
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            let _ = self.events.send(key.to_string());
        }
        removed
    }

    /// 键数量
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// 是否没有任何键
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryKvClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvClient for InMemoryKvClient {
    async fn get_prefix(&self, prefix: &str) -> ConfigResult<Vec<KeyValue>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> ConfigResult<Box<dyn KvWatchStream>> {
        Ok(Box::new(InMemoryKvWatchStream {
            receiver: self.events.subscribe(),
            prefix: prefix.to_string(),
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> ConfigResult<()> {
        self.set(key, value);
        Ok(())
    }
}

struct InMemoryKvWatchStream {
    receiver: broadcast::Receiver<String>,
    prefix: String,
}

#[async_trait]
impl KvWatchStream for InMemoryKvWatchStream {
    async fn next_event(&mut self) -> ConfigResult<Vec<String>> {
        loop {
            match self.receiver.recv().await {
                Ok(key) if key.starts_with(&self.prefix) => return Ok(vec![key]),
                Ok(_) => continue,
                // 落后时重新读取即可得到最新状态
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("键值变更事件积压, 跳过 {} 条", skipped);
                    return Ok(Vec::new());
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ConfigError::Closed),
            }
        }
    }
}
