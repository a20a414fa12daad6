//! # Configuration Abstractions
//!
//! 配置中心抽象层，定义配置源、编码器以及快照等核心类型。
//!
//! ## 核心接口
//!
//! - [`ConfigSource`] - 配置源接口
//! - [`SourceWatcher`] - 配置源监控接口
//! - [`Encoder`] - 配置编码器接口
//! - [`ChangeSet`] - 配置变更集
//! - [`Snapshot`] - 版本化的合并配置快照
//! - [`Value`] - 类型化配置值

pub mod changeset;
pub mod encoder;
pub mod snapshot;
pub mod source;
pub mod value;
pub mod watcher;

pub use changeset::*;
pub use encoder::*;
pub use snapshot::*;
pub use source::*;
pub use value::*;
pub use watcher::*;
