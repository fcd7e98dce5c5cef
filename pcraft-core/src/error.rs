//! 协议错误定义

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// 输入数据不足以解析字段
    #[error("Truncated input: field '{field}' needs {needed} bytes, {available} available")]
    TruncatedInput {
        field: String,
        needed: usize,
        available: usize,
    },
    /// 头部未挂接到报文，或缺少所需的外层头部
    #[error("Unattached header '{header}': {reason}")]
    UnattachedHeader { header: String, reason: String },
    /// 字段赋值被拒绝（符号名未知、类型不匹配等）
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidFieldValue { field: String, reason: String },
    /// 字段未找到
    #[error("Field not found: {0}")]
    FieldNotFound(String),
    /// 无效的字段定义
    #[error("Invalid field definition: {0}")]
    InvalidFieldDefinition(String),
    /// 两个头部类之间没有登记绑定
    #[error("No binding from '{container}' to '{candidate}'")]
    NoBinding { container: String, candidate: String },
    /// 头部类没有声明净荷字段，无法封装下一层
    #[error("Header '{0}' has no body field and cannot encapsulate another header")]
    NotEncapsulating(String),
    /// 未知的链路层类型
    #[error("Unknown link type: {0}")]
    UnknownLinkType(u32),
    /// 无法识别首个头部
    #[error("Cannot identify first header")]
    UnknownFirstHeader,
    /// 未知的头部类
    #[error("Unknown header class: {0}")]
    UnknownClass(String),
    /// JSON描述或类型字符串错误
    #[error("Invalid description: {0}")]
    InvalidDescription(String),
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl ProtocolError {
    pub fn truncated(field: &str, needed: usize, available: usize) -> Self {
        ProtocolError::TruncatedInput {
            field: field.to_string(),
            needed,
            available,
        }
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidFieldValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::InvalidDescription(e.to_string())
    }
}
