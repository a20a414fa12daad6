//! 配置源抽象接口

use crate::changeset::ChangeSet;
use crate::watcher::SourceWatcher;
use async_trait::async_trait;
use infrastructure_common::{ConfigError, ConfigResult};

/// 配置源 trait
///
/// 定义从不同后端获取配置快照的统一接口
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// 读取当前配置
    ///
    /// 失败时返回的错误必须能识别出本配置源（名称或文件路径）
    async fn read(&self) -> ConfigResult<ChangeSet>;

    /// 创建变更监控器
    async fn watch(&self) -> ConfigResult<Box<dyn SourceWatcher>> {
        Err(ConfigError::WatchUnsupported {
            source_name: self.name().to_string(),
        })
    }

    /// 写回配置
    async fn write(&self, _change_set: &ChangeSet) -> ConfigResult<()> {
        Err(ConfigError::WriteUnsupported {
            source_name: self.name().to_string(),
        })
    }

    /// 释放配置源持有的资源
    async fn close(&self) -> ConfigResult<()> {
        Ok(())
    }

    /// 获取配置源名称
    fn name(&self) -> &str;

    /// 是否支持热重载
    fn supports_hot_reload(&self) -> bool {
        false
    }
}
