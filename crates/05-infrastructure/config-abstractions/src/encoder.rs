//! 配置编码器抽象接口

use infrastructure_common::ConfigResult;
use serde_json::Value;

/// 配置编码器 trait
///
/// 在某种文本格式与通用配置树之间转换，按 [`Encoder::name`] 注册和查找
pub trait Encoder: Send + Sync {
    /// 将配置树编码为文本
    fn encode(&self, value: &Value) -> ConfigResult<Vec<u8>>;

    /// 将文本解码为配置树
    fn decode(&self, data: &[u8]) -> ConfigResult<Value>;

    /// 格式名称
    fn name(&self) -> &str;
}
