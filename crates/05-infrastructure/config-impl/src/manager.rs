//! 配置中心实现

use crate::reader::{Reader, ReaderOptions};
use crate::watcher::ConfigWatcher;
use config_abstractions::{ChangeSet, ConfigSource, Snapshot, SourceWatcher, Value};
use infrastructure_common::{ConfigError, ConfigResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

/// 某个配置源的一次更新
#[derive(Debug)]
struct SourceUpdate {
    index: usize,
    /// 主动读取时槽位的代数，监控器推送的更新为 `None`
    read_at: Option<u64>,
    change_set: ChangeSet,
}

impl SourceUpdate {
    fn pushed(index: usize, change_set: ChangeSet) -> Self {
        Self {
            index,
            read_at: None,
            change_set,
        }
    }

    fn read(index: usize, generation: u64, change_set: ChangeSet) -> Self {
        Self {
            index,
            read_at: Some(generation),
            change_set,
        }
    }
}

/// 配置中心选项
#[derive(Debug, Clone)]
pub struct StoreOptions {
    reader: ReaderOptions,
    watch_retry_interval: Duration,
}

impl StoreOptions {
    /// 创建默认选项
    pub fn new() -> Self {
        Self {
            reader: ReaderOptions::new(),
            watch_retry_interval: Duration::from_secs(1),
        }
    }

    /// 设置读取器选项
    pub fn with_reader(mut self, reader: ReaderOptions) -> Self {
        self.reader = reader;
        self
    }

    /// 设置监控失败后的重试间隔
    pub fn with_watch_retry_interval(mut self, interval: Duration) -> Self {
        self.watch_retry_interval = interval;
        self
    }

    /// 监控失败后的重试间隔
    pub fn watch_retry_interval(&self) -> Duration {
        self.watch_retry_interval
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// 已注册的配置源及其最近一次的变更集
///
/// 更新的先后由到达合并点的顺序决定，每安装一次变更集代数加一
struct Slot {
    source: Arc<dyn ConfigSource>,
    change_set: ChangeSet,
    generation: u64,
}

/// 监控器的初始状态
enum WatchState {
    Unsupported,
    Ready(Box<dyn SourceWatcher>),
    Pending,
}

struct StoreInner {
    reader: Reader,
    watch_retry_interval: Duration,
    /// 配置源槽位，只追加；合并和发布都在持有此锁时进行
    slots: Mutex<Vec<Slot>>,
    publisher: watch::Sender<Arc<Snapshot>>,
    updates: mpsc::UnboundedSender<SourceUpdate>,
    merge_receiver: Mutex<Option<mpsc::UnboundedReceiver<SourceUpdate>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// 配置中心
///
/// 汇聚多个配置源，按注册顺序合并为带版本号的快照，并在任一配置源
/// 变化时发布新版本。读取当前快照不会阻塞，也不会看到合并中间状态。
///
/// 可以廉价克隆，所有克隆共享同一份状态。最后一个克隆被丢弃时
/// 后台任务会被取消。
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("source_count", &self.source_count())
            .field("version", &self.version())
            .field("watch_retry_interval", &self.inner.watch_retry_interval)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConfigStore {
    /// 创建新的配置中心，初始快照为版本 0 的空配置
    pub fn new(options: StoreOptions) -> Self {
        let (publisher, _) = watch::channel(Arc::new(Snapshot::empty()));
        let (updates, merge_receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();

        Self {
            inner: Arc::new(StoreInner {
                reader: Reader::new(options.reader),
                watch_retry_interval: options.watch_retry_interval,
                slots: Mutex::new(Vec::new()),
                publisher,
                updates,
                merge_receiver: Mutex::new(Some(merge_receiver)),
                tasks: Mutex::new(Vec::new()),
                cancel,
                closed: AtomicBool::new(false),
            }),
            _guard: Arc::new(guard),
        }
    }

    /// 加载一批配置源
    ///
    /// 先为每个可监控的配置源创建监控器再读取，保证读取与监控之间的变更不会丢失。
    /// 任一配置源读取失败时整批配置源都不会注册。
    pub async fn load(&self, sources: Vec<Arc<dyn ConfigSource>>) -> ConfigResult<()> {
        self.ensure_open()?;
        if sources.is_empty() {
            return Ok(());
        }

        let mut states = Vec::with_capacity(sources.len());
        for source in &sources {
            states.push(open_watcher(source.as_ref()).await);
        }

        let mut change_sets = Vec::with_capacity(sources.len());
        for source in &sources {
            match source.read().await {
                Ok(change_set) => change_sets.push(change_set),
                Err(e) => {
                    error!("配置源 {} 读取失败: {}", source.name(), e);
                    stop_watchers(states).await;
                    return Err(with_source_name(source.name(), e));
                }
            }
        }

        let committed = {
            let mut slots = self.inner.slots.lock();
            let base = slots.len();
            slots.extend(
                sources
                    .iter()
                    .zip(change_sets)
                    .map(|(source, change_set)| Slot {
                        source: Arc::clone(source),
                        change_set,
                        generation: 0,
                    }),
            );
            match self.inner.publish_locked(&slots) {
                Ok(_) => Ok(base),
                Err(e) => {
                    slots.truncate(base);
                    Err(e)
                }
            }
        };

        let base = match committed {
            Ok(base) => base,
            Err(e) => {
                error!("加载配置源后合并失败: {}", e);
                stop_watchers(states).await;
                return Err(e);
            }
        };

        info!(
            "加载 {} 个配置源, 当前共 {} 个, 版本: {}",
            sources.len(),
            base + sources.len(),
            self.version()
        );
        self.spawn_watch_tasks(base, sources, states);
        Ok(())
    }

    /// 重新读取所有配置源，内容变化时发布新版本
    pub async fn sync(&self) -> ConfigResult<()> {
        self.ensure_open()?;
        let sources: Vec<(Arc<dyn ConfigSource>, u64)> = self
            .inner
            .slots
            .lock()
            .iter()
            .map(|slot| (Arc::clone(&slot.source), slot.generation))
            .collect();

        let mut updates = Vec::with_capacity(sources.len());
        for (index, (source, generation)) in sources.iter().enumerate() {
            let change_set = source
                .read()
                .await
                .map_err(|e| with_source_name(source.name(), e))?;
            updates.push(SourceUpdate::read(index, *generation, change_set));
        }

        let mut slots = self.inner.slots.lock();
        self.inner.commit_locked(&mut slots, updates)?;
        debug!("同步配置源完成, 版本: {}", self.version());
        Ok(())
    }

    /// 按路径获取配置值，路径不存在时返回空值而不是错误
    pub fn get(&self, path: &[&str]) -> Value {
        self.snapshot().get(path)
    }

    /// 当前合并后配置的字节
    pub fn bytes(&self) -> Vec<u8> {
        self.snapshot().bytes().to_vec()
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.publisher.borrow().clone()
    }

    /// 当前配置的顶层映射
    pub fn map(&self) -> Map<String, JsonValue> {
        self.snapshot()
            .values()
            .as_object()
            .cloned()
            .unwrap_or_default()
    }

    /// 将整个配置解码到指定类型
    pub fn scan<T>(&self) -> ConfigResult<T>
    where
        T: DeserializeOwned,
    {
        self.snapshot().scan()
    }

    /// 订阅新版本
    pub fn watch(&self) -> ConfigResult<ConfigWatcher> {
        self.ensure_open()?;
        let watcher = ConfigWatcher::new(
            self.inner.publisher.subscribe(),
            self.inner.cancel.child_token(),
        );
        debug!("创建配置监听器: {}", watcher.id());
        Ok(watcher)
    }

    /// 已注册的配置源数量
    pub fn source_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// 当前版本号
    pub fn version(&self) -> u64 {
        self.inner.publisher.borrow().version()
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// 关闭配置中心
    ///
    /// 停止所有后台任务并关闭配置源，之后所有监听器都返回 [`ConfigError::Closed`]。
    /// 重复调用无副作用。
    pub async fn close(&self) -> ConfigResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("关闭配置中心");
        self.inner.cancel.cancel();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("后台任务异常退出: {}", e);
            }
        }

        let sources: Vec<Arc<dyn ConfigSource>> = self
            .inner
            .slots
            .lock()
            .iter()
            .map(|slot| Arc::clone(&slot.source))
            .collect();
        for source in sources {
            if let Err(e) = source.close().await {
                warn!("关闭配置源 {} 失败: {}", source.name(), e);
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> ConfigResult<()> {
        if self.is_closed() {
            Err(ConfigError::Closed)
        } else {
            Ok(())
        }
    }

    fn spawn_watch_tasks(
        &self,
        base: usize,
        sources: Vec<Arc<dyn ConfigSource>>,
        states: Vec<WatchState>,
    ) {
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());

        if let Some(receiver) = self.inner.merge_receiver.lock().take() {
            tasks.push(tokio::spawn(merge_loop(Arc::clone(&self.inner), receiver)));
        }

        for (offset, (source, state)) in sources.into_iter().zip(states).enumerate() {
            let initial = match state {
                WatchState::Unsupported => continue,
                WatchState::Ready(watcher) => Some(watcher),
                WatchState::Pending => None,
            };
            tasks.push(tokio::spawn(watch_loop(
                base + offset,
                source,
                initial,
                self.inner.updates.clone(),
                self.inner.cancel.clone(),
                self.inner.watch_retry_interval,
            )));
        }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

#[cfg(test)]
impl ConfigStore {
    /// 绕过合并循环直接安装更新，`read_at` 为 `None` 时视为监控器推送
    pub(crate) fn apply_updates(&self, updates: Vec<(usize, Option<u64>, ChangeSet)>) {
        self.inner.apply_updates(
            updates
                .into_iter()
                .map(|(index, read_at, change_set)| SourceUpdate {
                    index,
                    read_at,
                    change_set,
                })
                .collect(),
        );
    }

    /// 槽位当前的代数
    pub(crate) fn slot_generation(&self, index: usize) -> Option<u64> {
        self.inner.slots.lock().get(index).map(|slot| slot.generation)
    }
}

impl StoreInner {
    /// 合并所有槽位，校验和变化时发布新快照
    ///
    /// 调用方必须持有槽位锁
    fn publish_locked(&self, slots: &[Slot]) -> ConfigResult<bool> {
        let (change_set, values) = self
            .reader
            .merge_tree(slots.iter().map(|slot| &slot.change_set))?;

        let current = self.publisher.borrow().clone();
        if current.checksum() == change_set.checksum() {
            debug!("配置内容未变化, 保持版本: {}", current.version());
            return Ok(false);
        }

        let version = current.version() + 1;
        info!("发布配置版本: {}, 校验和: {}", version, change_set.checksum());
        self.publisher
            .send_replace(Arc::new(Snapshot::new(version, change_set, values)));
        Ok(true)
    }

    /// 安装一批变更集并发布，合并失败时恢复原槽位
    ///
    /// 读取之后槽位又被更新过的读取结果会被忽略
    fn commit_locked(&self, slots: &mut [Slot], updates: Vec<SourceUpdate>) -> ConfigResult<bool> {
        let mut previous = Vec::new();
        for update in updates {
            let Some(slot) = slots.get_mut(update.index) else {
                warn!("忽略未知配置源的更新: {}", update.index);
                continue;
            };
            if update.read_at.is_some_and(|generation| generation != slot.generation) {
                debug!("配置源 {} 在读取后已更新, 忽略本次读取结果", slot.source.name());
                continue;
            }
            let replaced = std::mem::replace(&mut slot.change_set, update.change_set);
            slot.generation += 1;
            previous.push((update.index, replaced));
        }
        if previous.is_empty() {
            return Ok(false);
        }

        self.publish_locked(slots).map_err(|e| {
            for (index, change_set) in previous.into_iter().rev() {
                let slot = &mut slots[index];
                slot.change_set = change_set;
                slot.generation -= 1;
            }
            e
        })
    }

    fn apply_updates(&self, updates: Vec<SourceUpdate>) {
        let valid: Vec<SourceUpdate> = updates
            .into_iter()
            .filter(|update| match self.reader.values(&update.change_set) {
                Ok(_) => true,
                Err(e) => {
                    warn!("配置源 {} 的更新无法解码, 已忽略: {}", update.index, e);
                    false
                }
            })
            .collect();
        if valid.is_empty() {
            return;
        }

        let mut slots = self.slots.lock();
        if let Err(e) = self.commit_locked(&mut slots, valid) {
            error!("合并配置更新失败: {}", e);
        }
    }
}

/// 单一写者的合并循环，批量处理积压的更新
async fn merge_loop(inner: Arc<StoreInner>, mut updates: mpsc::UnboundedReceiver<SourceUpdate>) {
    let cancel = inner.cancel.clone();
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            update = updates.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        let mut batch = vec![first];
        while let Ok(update) = updates.try_recv() {
            batch.push(update);
        }
        debug!("处理 {} 个配置更新", batch.len());
        inner.apply_updates(batch);
    }
    debug!("合并循环已退出");
}

/// 单个配置源的监控循环
async fn watch_loop(
    index: usize,
    source: Arc<dyn ConfigSource>,
    mut initial: Option<Box<dyn SourceWatcher>>,
    updates: mpsc::UnboundedSender<SourceUpdate>,
    cancel: CancellationToken,
    retry_interval: Duration,
) {
    loop {
        let mut watcher = match initial.take() {
            Some(watcher) => watcher,
            None => {
                let opened = tokio::select! {
                    _ = cancel.cancelled() => break,
                    opened = source.watch() => opened,
                };
                match opened {
                    Ok(watcher) => watcher,
                    Err(e) if e.is_closed() => {
                        debug!("配置源 {} 不再支持监控: {}", source.name(), e);
                        break;
                    }
                    Err(e) => {
                        warn!("重新创建配置源 {} 的监控器失败: {}", source.name(), e);
                        if wait_retry(&cancel, retry_interval).await {
                            continue;
                        }
                        break;
                    }
                }
            }
        };

        let failure = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                next = watcher.next() => Some(next),
            };
            match next {
                None => break None,
                Some(Ok(change_set)) => {
                    debug!("配置源 {} 发生变更", source.name());
                    let update = SourceUpdate::pushed(index, change_set);
                    if updates.send(update).is_err() {
                        break None;
                    }
                }
                Some(Err(e)) if e.is_closed() => break None,
                Some(Err(e)) => break Some(e),
            }
        };

        if let Err(e) = watcher.stop().await {
            debug!("停止配置源 {} 的监控器失败: {}", source.name(), e);
        }

        match failure {
            Some(e) => {
                warn!(
                    "配置源 {} 监控出错, {:?} 后重试: {}",
                    source.name(),
                    retry_interval,
                    e
                );
                if !wait_retry(&cancel, retry_interval).await {
                    break;
                }
            }
            None => break,
        }
    }
    debug!("配置源 {} 的监控循环已退出", source.name());
}

/// 等待重试间隔，被取消时返回 false
async fn wait_retry(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

async fn open_watcher(source: &dyn ConfigSource) -> WatchState {
    if !source.supports_hot_reload() {
        return WatchState::Unsupported;
    }
    match source.watch().await {
        Ok(watcher) => WatchState::Ready(watcher),
        Err(e) if e.is_closed() => WatchState::Unsupported,
        Err(e) => {
            warn!("创建配置源 {} 的监控器失败, 将在后台重试: {}", source.name(), e);
            WatchState::Pending
        }
    }
}

async fn stop_watchers(states: Vec<WatchState>) {
    for state in states {
        if let WatchState::Ready(mut watcher) = state {
            if let Err(e) = watcher.stop().await {
                debug!("停止监控器失败: {}", e);
            }
        }
    }
}

/// 确保读取错误能识别出配置源
fn with_source_name(name: &str, error: ConfigError) -> ConfigError {
    match error {
        ConfigError::SourceReadError { .. } => error,
        other => ConfigError::source_read(name, other),
    }
}
