//! # Configuration Implementation
//!
//! 实时配置中心的具体实现：汇聚多个配置源，合并为带版本号的快照，
//! 并在配置源变化时通知监听器。
//!
//! ## 主要组件
//!
//! - [`ConfigStore`] - 配置中心
//! - [`ConfigWatcher`] - 配置版本监听器
//! - [`Reader`] - 变更集解码与合并
//! - [`EncoderRegistry`] - 配置格式编码器注册表
//! - [`FileSource`] / [`EnvSource`] / [`MemorySource`] / [`KvSource`] - 配置源

pub mod encoders;
pub mod manager;
pub mod providers;
pub mod reader;
pub mod watcher;

pub use encoders::*;
pub use manager::*;
pub use providers::*;
pub use reader::*;
pub use watcher::*;

#[cfg(test)]
mod tests;
