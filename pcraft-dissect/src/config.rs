//! 解析驱动配置

use serde::{Deserialize, Serialize};

use pcraft_core::ProtocolError;

/// 解析驱动配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DissectConfig {
    /// 最多解析的头部数，超出后剩余字节保持不透明；`None` 不限制
    pub max_headers: Option<usize>,
    /// 首部长度为0的头部追加后立即停止
    pub stop_on_zero_length: bool,
    /// 猜测的内层头部数据不足时把字节保留为不透明净荷，而不是返回错误
    pub lenient_truncation: bool,
}

impl Default for DissectConfig {
    fn default() -> Self {
        Self {
            max_headers: Some(32),
            stop_on_zero_length: true,
            lenient_truncation: false,
        }
    }
}

impl DissectConfig {
    pub fn from_json(json_str: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json_str)?)
    }

    pub fn with_max_headers(mut self, max_headers: Option<usize>) -> Self {
        self.max_headers = max_headers;
        self
    }

    pub fn lenient(mut self, lenient_truncation: bool) -> Self {
        self.lenient_truncation = lenient_truncation;
        self
    }
}
