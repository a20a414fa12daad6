//! 文件配置源

use crate::encoders::EncoderRegistry;
use crate::reader::{Reader, ReaderOptions};
use async_trait::async_trait;
use config_abstractions::{ChangeSet, ConfigSource, SourceWatcher};
use infrastructure_common::{ConfigError, ConfigResult};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 文件配置源
///
/// 支持声明多个文件，按声明顺序合并，后面的文件覆盖前面的文件。
/// 文件格式由扩展名决定，扩展名未注册编码器时使用默认格式。
#[derive(Debug, Clone)]
pub struct FileSource {
    paths: Vec<PathBuf>,
    format: String,
    encoders: EncoderRegistry,
    debounce_delay: Duration,
    name: String,
}

impl FileSource {
    /// 创建新的文件配置源
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            format: "json".to_string(),
            encoders: EncoderRegistry::new(),
            debounce_delay: Duration::from_millis(50),
            name: "file".to_string(),
        }
    }

    /// 添加文件路径
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.paths.push(path.as_ref().to_path_buf());
        self.name = format!(
            "file:{}",
            self.paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        self
    }

    /// 设置无法从扩展名识别时使用的格式
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// 设置编码器注册表
    pub fn with_encoders(mut self, encoders: EncoderRegistry) -> Self {
        self.encoders = encoders;
        self
    }

    /// 设置防抖延迟
    pub fn with_debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = delay;
        self
    }

    /// 获取文件路径
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// 根据扩展名确定文件格式
    pub fn format_for(&self, path: &Path) -> String {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .filter(|ext| self.encoders.contains(ext))
            .unwrap_or_else(|| self.format.clone())
    }

    async fn read_path(&self, path: &Path) -> ConfigResult<ChangeSet> {
        debug!("读取配置文件: {}", path.display());
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| ConfigError::source_read(path.display().to_string(), e))?;
        Ok(ChangeSet::new(
            data,
            self.format_for(path),
            path.display().to_string(),
        ))
    }

    /// 读取并合并全部文件
    async fn read_all(&self) -> ConfigResult<ChangeSet> {
        if self.paths.is_empty() {
            return Err(ConfigError::source_read(&self.name, "未配置文件路径"));
        }

        let mut change_sets = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            change_sets.push(self.read_path(path).await?);
        }

        if change_sets.len() == 1 {
            return Ok(change_sets.remove(0));
        }

        // 插值由配置中心统一处理，这里只做合并
        let reader = Reader::new(
            ReaderOptions::new()
                .with_encoders(self.encoders.clone())
                .with_disable_replace_env_vars(),
        );
        let merged = reader
            .merge(&change_sets)
            .map_err(|e| ConfigError::source_read(&self.name, e))?;
        Ok(ChangeSet::new(merged.data(), merged.format(), self.name.as_str()))
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn read(&self) -> ConfigResult<ChangeSet> {
        self.read_all().await
    }

    async fn watch(&self) -> ConfigResult<Box<dyn SourceWatcher>> {
        let watcher = FileSourceWatcher::new(self.clone())?;
        Ok(Box::new(watcher))
    }

    async fn write(&self, change_set: &ChangeSet) -> ConfigResult<()> {
        let path = self
            .paths
            .first()
            .ok_or_else(|| ConfigError::WriteUnsupported {
                source_name: self.name.clone(),
            })?;
        info!("写回配置文件: {}", path.display());
        tokio::fs::write(path, change_set.data()).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_hot_reload(&self) -> bool {
        true
    }
}

/// 文件配置源监控器
///
/// 监控文件所在目录，以便在编辑器整体替换文件后仍能收到事件
struct FileSourceWatcher {
    source: FileSource,
    watcher: Option<RecommendedWatcher>,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    file_names: BTreeSet<OsString>,
    last_checksum: Option<String>,
}

impl FileSourceWatcher {
    fn new(source: FileSource) -> ConfigResult<Self> {
        let (sender, events) = mpsc::unbounded_channel();
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let _ = sender.send(res);
        })
        .map_err(|e| ConfigError::watch(format!("创建文件监控器失败: {e}")))?;

        let mut directories = BTreeSet::new();
        let mut file_names = BTreeSet::new();
        for path in source.paths() {
            let directory = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            directories.insert(directory);
            if let Some(name) = path.file_name() {
                file_names.insert(name.to_os_string());
            }
        }

        for directory in &directories {
            watcher
                .watch(directory, RecursiveMode::NonRecursive)
                .map_err(|e| ConfigError::watch(format!("添加监控路径失败: {} - {e}", directory.display())))?;
            debug!("添加监控路径: {}", directory.display());
        }

        Ok(Self {
            source,
            watcher: Some(watcher),
            events,
            file_names,
            last_checksum: None,
        })
    }

    fn is_relevant(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event.paths.iter().any(|path| {
            path.file_name()
                .is_some_and(|name| self.file_names.contains(name))
        })
    }
}

#[async_trait]
impl SourceWatcher for FileSourceWatcher {
    async fn next(&mut self) -> ConfigResult<ChangeSet> {
        loop {
            let event = self
                .events
                .recv()
                .await
                .ok_or(ConfigError::Closed)?
                .map_err(|e| ConfigError::watch(format!("文件监控错误: {e}")))?;
            if !self.is_relevant(&event) {
                continue;
            }

            // 合并短时间内的连续事件
            tokio::time::sleep(self.source.debounce_delay).await;
            while self.events.try_recv().is_ok() {}

            let change_set = match self.source.read_all().await {
                Ok(change_set) => change_set,
                Err(e) => {
                    warn!("文件变更后读取失败: {}", e);
                    return Err(e);
                }
            };
            if self.last_checksum.as_deref() == Some(change_set.checksum()) {
                continue;
            }
            self.last_checksum = Some(change_set.checksum().to_string());
            debug!("检测到配置文件变更: {}", self.source.name());
            return Ok(change_set);
        }
    }

    async fn stop(&mut self) -> ConfigResult<()> {
        if self.watcher.take().is_some() {
            info!("停止配置文件监控: {}", self.source.name());
        }
        self.events.close();
        Ok(())
    }
}
