//! 单个字段值的读写与长度计算
//!
//! 所有读操作返回 (值, 消耗字节数)，数据不足时返回 `TruncatedInput`

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::kind::{CountSource, Endian, FieldKind, IntWidth, LengthSource};
use super::value::{Body, FieldValue};
use crate::error::ProtocolError;
use crate::header::Header;

/// 净荷写出回调：`Body::Encapsulated` 时由报文提供下一层的字节
pub type BodyWriter<'a> = &'a mut dyn FnMut(&mut Vec<u8>);

/// 从缓冲区读取一个字段值
///
/// # 参数
/// - `kind`: 字段类型
/// - `name`: 字段名（用于错误信息）
/// - `buf`: 从当前偏移开始的剩余数据
/// - `owner`: 所属头部（长度回调、计数字段在其上求值）
pub(crate) fn read_value(
    kind: &FieldKind,
    name: &str,
    buf: &[u8],
    owner: &Header,
) -> Result<(FieldValue, usize), ProtocolError> {
    match kind {
        FieldKind::Int { width, endian, .. } => {
            let n = width.bytes();
            if buf.len() < n {
                return Err(ProtocolError::truncated(name, n, buf.len()));
            }
            let value = match endian {
                Endian::Big => BigEndian::read_uint(buf, n),
                Endian::Little => LittleEndian::read_uint(buf, n),
            };
            Ok((FieldValue::Int(value), n))
        }
        FieldKind::Bytes(length) => {
            let n = bounded_length(length, name, buf, owner)?;
            Ok((FieldValue::Bytes(buf[..n].to_vec()), n))
        }
        FieldKind::Struct(class) => {
            let (header, n) = class.deserialize(buf)?;
            Ok((FieldValue::Struct(Box::new(header)), n))
        }
        FieldKind::Array { element, count } => read_array(element, count, name, buf, owner),
        FieldKind::Body(length) => {
            let n = bounded_length(length, name, buf, owner)?;
            Ok((FieldValue::Body(Body::raw(&buf[..n])), n))
        }
    }
}

/// 求出字段长度并检查边界，`Rest` 取剩余全部
fn bounded_length(
    length: &LengthSource,
    name: &str,
    buf: &[u8],
    owner: &Header,
) -> Result<usize, ProtocolError> {
    let n = length.resolve(owner)?.unwrap_or(buf.len());
    if n > buf.len() {
        return Err(ProtocolError::truncated(name, n, buf.len()));
    }
    Ok(n)
}

fn read_array(
    element: &FieldKind,
    count: &CountSource,
    name: &str,
    buf: &[u8],
    owner: &Header,
) -> Result<(FieldValue, usize), ProtocolError> {
    let mut items = Vec::new();
    let mut offset = 0usize;

    match count {
        CountSource::Counter(counter) => {
            let count = owner.uint(counter)?;
            for _ in 0..count {
                let (item, used) = read_value(element, name, &buf[offset..], owner)?;
                items.push(item);
                if used == 0 {
                    break;
                }
                offset += used;
            }
        }
        CountSource::Budget(length) => {
            let budget = bounded_length(length, name, buf, owner)?;
            let window = &buf[..budget];
            while offset < budget {
                let (item, used) = read_value(element, name, &window[offset..], owner)?;
                // 零宽元素会导致死循环
                if used == 0 {
                    break;
                }
                items.push(item);
                offset += used;
            }
        }
    }

    Ok((FieldValue::Array(items), offset))
}

/// 写出一个字段值
pub(crate) fn write_value(
    kind: &FieldKind,
    value: &FieldValue,
    out: &mut Vec<u8>,
    body: BodyWriter<'_>,
) {
    match (kind, value) {
        (FieldKind::Int { width, endian, .. }, FieldValue::Int(v)) => {
            write_int(*width, *endian, *v, out)
        }
        (FieldKind::Bytes(_), FieldValue::Bytes(data)) => out.extend_from_slice(data),
        (FieldKind::Struct(_), FieldValue::Struct(header)) => {
            header.write_into(out, &mut |_: &mut Vec<u8>| {})
        }
        (FieldKind::Array { element, .. }, FieldValue::Array(items)) => {
            for item in items {
                write_value(element, item, out, body);
            }
        }
        (FieldKind::Body(_), FieldValue::Body(Body::Raw(data))) => out.extend_from_slice(data),
        (FieldKind::Body(_), FieldValue::Body(Body::Encapsulated)) => body(out),
        // 类型不匹配时按零值输出，保证与 value_size 一致
        (kind, _) => write_value(kind, &kind.zero_value(), out, body),
    }
}

/// 按大/小端写出整数，超出宽度的比特被截掉
pub(crate) fn write_int(width: IntWidth, endian: Endian, value: u64, out: &mut Vec<u8>) {
    let n = width.bytes();
    let value = value & width.mask();
    let mut buf = [0u8; 8];
    match endian {
        Endian::Big => BigEndian::write_uint(&mut buf[..n], value, n),
        Endian::Little => LittleEndian::write_uint(&mut buf[..n], value, n),
    }
    out.extend_from_slice(&buf[..n]);
}

/// 字段值序列化后的字节数（不分配内存）
pub(crate) fn value_size(kind: &FieldKind, value: &FieldValue, body_size: usize) -> usize {
    match (kind, value) {
        (FieldKind::Int { width, .. }, FieldValue::Int(_)) => width.bytes(),
        (FieldKind::Bytes(_), FieldValue::Bytes(data)) => data.len(),
        (FieldKind::Struct(_), FieldValue::Struct(header)) => header.size(),
        (FieldKind::Array { element, .. }, FieldValue::Array(items)) => items
            .iter()
            .map(|item| value_size(element, item, body_size))
            .sum(),
        (FieldKind::Body(_), FieldValue::Body(Body::Raw(data))) => data.len(),
        (FieldKind::Body(_), FieldValue::Body(Body::Encapsulated)) => body_size,
        (kind, _) => value_size(kind, &kind.zero_value(), body_size),
    }
}
