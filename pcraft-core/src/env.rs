//! 派生字段计算时的上下文
//!
//! 长度、校验和等钩子可能需要头部以外的信息：净荷序列化后的字节、
//! 外层头部（如TCP校验和需要的IP伪首部）。报文实现该trait，
//! 独立的头部使用 `DetachedEnv`

use crate::error::ProtocolError;
use crate::field::Body;
use crate::header::Header;

pub trait HeaderEnv {
    /// 头部净荷序列化后的字节（包括被封装的内层头部）
    fn body_bytes(&self, header: &Header) -> Vec<u8>;

    /// 最近的、类名在 `classes` 中的外层头部
    fn outer(&self, header: &Header, classes: &[&str]) -> Result<&Header, ProtocolError>;
}

/// 未挂接到报文的头部的上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedEnv;

impl HeaderEnv for DetachedEnv {
    fn body_bytes(&self, header: &Header) -> Vec<u8> {
        match header.body() {
            Some(Body::Raw(data)) => data.to_vec(),
            _ => Vec::new(),
        }
    }

    fn outer(&self, header: &Header, classes: &[&str]) -> Result<&Header, ProtocolError> {
        let reason = if header.attachment().is_some() {
            format!("packet is not available to look up {}", classes.join("/"))
        } else {
            format!("not attached to a packet, cannot find {}", classes.join("/"))
        };
        Err(ProtocolError::UnattachedHeader {
            header: header.class_name().to_string(),
            reason,
        })
    }
}
