//! 配置源实现

pub mod env;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod file;
pub mod kv;
pub mod memory;

pub use env::EnvSource;
#[cfg(feature = "etcd")]
pub use etcd::EtcdKvClient;
pub use file::FileSource;
pub use kv::{InMemoryKvClient, KeyValue, KvClient, KvOptions, KvSource, KvWatchStream};
pub use memory::MemorySource;
