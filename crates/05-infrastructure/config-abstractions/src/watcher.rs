//! 配置源监控抽象接口

use crate::changeset::ChangeSet;
use async_trait::async_trait;
use infrastructure_common::ConfigResult;

/// 配置源监控器 trait
///
/// 由 [`ConfigSource::watch`](crate::ConfigSource::watch) 创建，
/// 每次后端发生变更时产出一个新的变更集
#[async_trait]
pub trait SourceWatcher: Send {
    /// 等待下一次变更
    ///
    /// 返回 [`ConfigError::Closed`](infrastructure_common::ConfigError::Closed)
    /// 表示监控已永久结束，其余错误可以通过重新创建监控器来恢复
    async fn next(&mut self) -> ConfigResult<ChangeSet>;

    /// 停止监控
    async fn stop(&mut self) -> ConfigResult<()>;
}
