//! 错误类型定义

use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置源读取失败: {source_name}, 原因: {message}")]
    SourceReadError { source_name: String, message: String },

    #[error("不支持的配置格式: {format}")]
    UnsupportedFormat { format: String },

    #[error("配置解码失败: {message}")]
    DecodeError { message: String },

    #[error("配置编码失败: {message}")]
    EncodeError { message: String },

    #[error("配置中心或监听器已关闭")]
    Closed,

    #[error("配置源监控失败: {message}")]
    WatchError { message: String },

    #[error("配置源不支持写入: {source_name}")]
    WriteUnsupported { source_name: String },

    #[error("配置源不支持监控: {source_name}")]
    WatchUnsupported { source_name: String },

    #[error("配置文件读取失败: {source}")]
    FileReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("配置序列化失败: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// 创建配置源读取错误
    pub fn source_read(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::SourceReadError {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// 创建解码错误
    pub fn decode(message: impl ToString) -> Self {
        Self::DecodeError {
            message: message.to_string(),
        }
    }

    /// 创建编码错误
    pub fn encode(message: impl ToString) -> Self {
        Self::EncodeError {
            message: message.to_string(),
        }
    }

    /// 创建监控错误
    pub fn watch(message: impl ToString) -> Self {
        Self::WatchError {
            message: message.to_string(),
        }
    }

    /// 是否为关闭错误
    ///
    /// 监控循环据此区分永久终止与可重试的失败
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::WatchUnsupported { .. })
    }
}

/// 结果类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
