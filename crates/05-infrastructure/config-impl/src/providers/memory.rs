//! 内存配置源

use async_trait::async_trait;
use config_abstractions::{ChangeSet, ConfigSource, SourceWatcher};
use infrastructure_common::{ConfigError, ConfigResult};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

const SOURCE_NAME: &str = "memory";

/// 内存配置源
///
/// 保存一份进程内的配置，可以在运行时通过 [`MemorySource::update`] 更新，
/// 更新会通知所有监控器
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    sender: watch::Sender<ChangeSet>,
}

impl MemorySource {
    /// 创建空的内存配置源
    pub fn new() -> Self {
        Self::with_change_set(ChangeSet::new("{}", "json", SOURCE_NAME))
    }

    /// 使用 JSON 文本创建
    pub fn with_json(data: impl Into<Vec<u8>>) -> Self {
        Self::with_change_set(ChangeSet::new(data, "json", SOURCE_NAME))
    }

    /// 使用配置树创建
    pub fn with_value(value: &Value) -> Self {
        Self::with_json(value.to_string())
    }

    /// 使用任意格式的变更集创建
    pub fn with_change_set(change_set: ChangeSet) -> Self {
        let (sender, _) = watch::channel(change_set);
        Self {
            name: SOURCE_NAME.to_string(),
            sender,
        }
    }

    /// 设置名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 更新配置并通知监控器
    pub fn update(&self, change_set: ChangeSet) {
        debug!("更新内存配置源 {}, 校验和: {}", self.name, change_set.checksum());
        self.sender.send_replace(change_set);
    }

    /// 使用 JSON 文本更新
    pub fn update_json(&self, data: impl Into<Vec<u8>>) {
        self.update(ChangeSet::new(data, "json", self.name.as_str()));
    }

    /// 当前配置
    pub fn current(&self) -> ChangeSet {
        self.sender.borrow().clone()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for MemorySource {
    async fn read(&self) -> ConfigResult<ChangeSet> {
        Ok(self.current())
    }

    async fn watch(&self) -> ConfigResult<Box<dyn SourceWatcher>> {
        Ok(Box::new(MemoryWatcher {
            receiver: self.sender.subscribe(),
            stopped: false,
        }))
    }

    async fn write(&self, change_set: &ChangeSet) -> ConfigResult<()> {
        self.update(change_set.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_hot_reload(&self) -> bool {
        true
    }
}

/// 内存配置源监控器
struct MemoryWatcher {
    receiver: watch::Receiver<ChangeSet>,
    stopped: bool,
}

#[async_trait]
impl SourceWatcher for MemoryWatcher {
    async fn next(&mut self) -> ConfigResult<ChangeSet> {
        if self.stopped {
            return Err(ConfigError::Closed);
        }
        self.receiver
            .changed()
            .await
            .map_err(|_| ConfigError::Closed)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    async fn stop(&mut self) -> ConfigResult<()> {
        self.stopped = true;
        Ok(())
    }
}
