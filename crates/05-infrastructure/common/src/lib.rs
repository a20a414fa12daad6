//! # Infrastructure Common
//!
//! 这个 crate 提供了 Lorn ADSP 配置中心各层共享的错误类型。
//!
//! ## 核心组件
//!
//! - [`ConfigError`] - 配置错误类型
//! - [`ConfigResult`] - 结果类型别名

pub mod errors;

pub use errors::*;
