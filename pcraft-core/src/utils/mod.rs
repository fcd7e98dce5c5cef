//! 工具模块
//!
//! 派生字段常用的辅助函数：长度字段、16位反码校验和

use crate::error::ProtocolError;
use crate::field::FieldKind;
use crate::header::Header;

pub mod checksum;

/// 把长度字段设置为给定大小，大小超出字段宽度时报错
///
/// # 参数
/// - `header`: 目标头部
/// - `field`: 长度字段（整数字段或位子字段）
/// - `size`: 要写入的长度
pub fn set_length_field(header: &mut Header, field: &str, size: usize) -> Result<(), ProtocolError> {
    let bits = if let Some((_, bit)) = header.class().bit_field(field) {
        bit.width
    } else {
        match header.class().field(field).map(|schema| schema.kind()) {
            Some(FieldKind::Int { width, .. }) => width.bits(),
            Some(other) => {
                return Err(ProtocolError::invalid_value(
                    field,
                    format!("length field must be an integer, found {}", other.type_name()),
                ))
            }
            None => {
                return Err(ProtocolError::FieldNotFound(format!(
                    "{}.{}",
                    header.class_name(),
                    field
                )))
            }
        }
    };

    if bits < 64 && (size as u64) >> bits != 0 {
        return Err(ProtocolError::invalid_value(
            field,
            format!("length {size} does not fit in {bits} bits"),
        ));
    }
    header.set_uint(field, size as u64)
}
