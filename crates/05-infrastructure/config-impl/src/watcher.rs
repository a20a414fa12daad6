//! 配置监听器实现

use config_abstractions::Snapshot;
use infrastructure_common::{ConfigError, ConfigResult};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

struct WatcherState {
    receiver: watch::Receiver<Arc<Snapshot>>,
    last_version: u64,
}

/// 配置监听器
///
/// 由 [`ConfigStore::watch`](crate::ConfigStore::watch) 创建。每次 [`next`](Self::next)
/// 返回比上次更新的版本，版本号严格递增。处理较慢时中间版本会被跳过，
/// 只会拿到最新的快照。
pub struct ConfigWatcher {
    id: Uuid,
    state: Mutex<WatcherState>,
    closed: CancellationToken,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("id", &self.id)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl ConfigWatcher {
    /// 从订阅时的版本开始监听
    pub(crate) fn new(receiver: watch::Receiver<Arc<Snapshot>>, closed: CancellationToken) -> Self {
        let last_version = receiver.borrow().version();
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(WatcherState {
                receiver,
                last_version,
            }),
            closed,
        }
    }

    /// 监听器标识
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 等待下一个版本
    ///
    /// 监听器或配置中心关闭后返回 [`ConfigError::Closed`]
    pub async fn next(&self) -> ConfigResult<Arc<Snapshot>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        loop {
            if self.closed.is_cancelled() {
                return Err(ConfigError::Closed);
            }

            let latest = state.receiver.borrow_and_update().clone();
            if latest.version() > state.last_version {
                state.last_version = latest.version();
                return Ok(latest);
            }

            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(ConfigError::Closed),
                changed = state.receiver.changed() => {
                    if changed.is_err() {
                        return Err(ConfigError::Closed);
                    }
                }
            }
        }
    }

    /// 关闭监听器，唤醒等待中的 [`next`](Self::next)
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("关闭配置监听器: {}", self.id);
            self.closed.cancel();
        }
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
