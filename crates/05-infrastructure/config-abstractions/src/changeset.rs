//! 配置变更集定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 配置变更集
///
/// 某个配置源在某一时刻的完整编码内容。创建后不可修改，
/// 两个变更集只要校验和相同即视为等价，与时间戳无关。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    data: Vec<u8>,
    format: String,
    checksum: String,
    timestamp: DateTime<Utc>,
    source: String,
}

impl ChangeSet {
    /// 创建新的变更集，自动计算校验和并记录当前时间
    pub fn new(data: impl Into<Vec<u8>>, format: impl Into<String>, source: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            checksum: Self::compute_checksum(&data),
            data,
            format: format.into(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// 计算内容校验和（SHA-256 十六进制）
    pub fn compute_checksum(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// 编码后的原始内容
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 编码格式名称
    pub fn format(&self) -> &str {
        &self.format
    }

    /// 内容校验和
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// 生成时间
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// 产生该变更集的配置源名称
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 与另一个变更集内容是否等价
    pub fn is_equivalent(&self, other: &ChangeSet) -> bool {
        self.checksum == other.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_identity_ignores_timestamp() {
        let first = ChangeSet::new(r#"{"foo":"bar"}"#, "json", "memory");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ChangeSet::new(r#"{"foo":"bar"}"#, "json", "file");

        assert!(first.is_equivalent(&second));
        assert_ne!(first.timestamp(), second.timestamp());
        assert_eq!(first.checksum().len(), 64);
    }

    #[test]
    fn test_different_content_differs() {
        let first = ChangeSet::new(r#"{"foo":"bar"}"#, "json", "memory");
        let second = ChangeSet::new(r#"{"foo":"baz"}"#, "json", "memory");
        assert!(!first.is_equivalent(&second));
    }
}
