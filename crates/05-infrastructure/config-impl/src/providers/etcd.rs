//! etcd 键值存储客户端

use super::kv::{KeyValue, KvClient, KvOptions, KvWatchStream};
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, WatchOptions, WatchStream, Watcher};
use infrastructure_common::{ConfigError, ConfigResult};
use tracing::info;

/// 基于 etcd 的键值客户端
#[derive(Clone)]
pub struct EtcdKvClient {
    client: Client,
}

impl std::fmt::Debug for EtcdKvClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdKvClient").finish_non_exhaustive()
    }
}

impl EtcdKvClient {
    /// 按选项连接 etcd
    pub async fn connect(options: &KvOptions) -> ConfigResult<Self> {
        let mut connect_options = ConnectOptions::new().with_connect_timeout(options.dial_timeout());
        if let Some((username, password)) = options.auth() {
            connect_options = connect_options.with_user(username, password);
        }

        let addresses = options.addresses();
        let client = Client::connect(&addresses, Some(connect_options))
            .await
            .map_err(|e| ConfigError::source_read(addresses.join(","), e))?;
        info!("已连接 etcd: {}", addresses.join(","));
        Ok(Self { client })
    }
}

#[async_trait]
impl KvClient for EtcdKvClient {
    async fn get_prefix(&self, prefix: &str) -> ConfigResult<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| ConfigError::source_read(prefix, e))?;

        response
            .kvs()
            .iter()
            .map(|kv| {
                Ok(KeyValue {
                    key: kv.key_str().map_err(ConfigError::decode)?.to_string(),
                    value: kv.value().to_vec(),
                })
            })
            .collect()
    }

    async fn watch_prefix(&self, prefix: &str) -> ConfigResult<Box<dyn KvWatchStream>> {
        let mut client = self.client.clone();
        let (watcher, stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(ConfigError::watch)?;
        Ok(Box::new(EtcdWatchStream {
            _watcher: watcher,
            stream,
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> ConfigResult<()> {
        let mut client = self.client.clone();
        client
            .put(key, value, None)
            .await
            .map_err(|e| ConfigError::source_read(key, e))?;
        Ok(())
    }
}

struct EtcdWatchStream {
    // 丢弃后服务端会取消监控
    _watcher: Watcher,
    stream: WatchStream,
}

#[async_trait]
impl KvWatchStream for EtcdWatchStream {
    async fn next_event(&mut self) -> ConfigResult<Vec<String>> {
        let response = self
            .stream
            .message()
            .await
            .map_err(ConfigError::watch)?
            .ok_or_else(|| ConfigError::watch("etcd 监控流已结束"))?;
        if response.canceled() {
            return Err(ConfigError::watch("etcd 监控已被服务端取消"));
        }
        Ok(response
            .events()
            .iter()
            .filter_map(|event| event.kv())
            .filter_map(|kv| kv.key_str().ok().map(str::to_string))
            .collect())
    }
}
