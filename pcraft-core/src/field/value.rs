//! 字段值

use bytes::Bytes;

use crate::header::Header;

/// 净荷槽位的内容：要么是原始字节，要么已被下一层头部占据（二者不会同时存在）
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// 尚未进一步解析的原始字节
    Raw(Bytes),
    /// 由报文中紧随其后的头部填充
    Encapsulated,
}

impl Body {
    pub fn raw(data: &[u8]) -> Self {
        Body::Raw(Bytes::copy_from_slice(data))
    }

    pub fn is_encapsulated(&self) -> bool {
        matches!(self, Body::Encapsulated)
    }

    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Body::Raw(data) => Some(data),
            Body::Encapsulated => None,
        }
    }
}

/// 字段值
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(u64),
    Bytes(Vec<u8>),
    Struct(Box<Header>),
    Array(Vec<FieldValue>),
    Body(Body),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_header(&self) -> Option<&Header> {
        match self {
            FieldValue::Struct(header) => Some(header),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_body(&self) -> Option<&Body> {
        match self {
            FieldValue::Body(body) => Some(body),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "integer",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Struct(_) => "struct",
            FieldValue::Array(_) => "array",
            FieldValue::Body(_) => "body",
        }
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(v as u64)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Int(v as u64)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Int(v as u64)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(v: &[u8]) -> Self {
        FieldValue::Bytes(v.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for FieldValue {
    fn from(v: [u8; N]) -> Self {
        FieldValue::Bytes(v.to_vec())
    }
}

impl From<Header> for FieldValue {
    fn from(h: Header) -> Self {
        FieldValue::Struct(Box::new(h))
    }
}

impl From<Body> for FieldValue {
    fn from(b: Body) -> Self {
        FieldValue::Body(b)
    }
}
