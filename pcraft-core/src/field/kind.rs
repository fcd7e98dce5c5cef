//! 字段类型描述
//!
//! 定长整数（可带枚举表）、字节串、嵌套结构、重复数组以及净荷槽位

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::value::{Body, FieldValue};
use crate::error::ProtocolError;
use crate::header::Header;
use crate::schema::HeaderClass;

/// 字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian {
    Big,
    Little,
}

/// 整数宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntWidth {
    W8,
    W16,
    W24,
    W32,
    W64,
}

impl IntWidth {
    /// 字节数
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W24 => 3,
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
        }
    }

    /// 比特数
    pub fn bits(self) -> u32 {
        (self.bytes() * 8) as u32
    }

    /// 该宽度能表示的最大值掩码
    pub fn mask(self) -> u64 {
        match self {
            IntWidth::W64 => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(IntWidth::W8),
            16 => Some(IntWidth::W16),
            24 => Some(IntWidth::W24),
            32 => Some(IntWidth::W32),
            64 => Some(IntWidth::W64),
            _ => None,
        }
    }
}

/// 长度回调，针对所属头部实例求值
pub type LengthFn = Arc<dyn Fn(&Header) -> usize + Send + Sync>;

/// 字节串/净荷的长度来源
#[derive(Clone)]
pub enum LengthSource {
    /// 消耗缓冲区剩余的全部字节（必须是最后一个字段）
    Rest,
    /// 固定字节数
    Fixed(usize),
    /// 引用前面某个整数字段（或位子字段）的当前值
    Field(String),
    /// 回调
    Callback(LengthFn),
}

impl LengthSource {
    pub fn field(name: &str) -> Self {
        LengthSource::Field(name.to_string())
    }

    pub fn callback(f: impl Fn(&Header) -> usize + Send + Sync + 'static) -> Self {
        LengthSource::Callback(Arc::new(f))
    }

    /// 求长度，`Rest` 返回 `None`
    pub(crate) fn resolve(&self, owner: &Header) -> Result<Option<usize>, ProtocolError> {
        match self {
            LengthSource::Rest => Ok(None),
            LengthSource::Fixed(n) => Ok(Some(*n)),
            LengthSource::Field(name) => owner.uint(name).map(|v| Some(v as usize)),
            LengthSource::Callback(f) => Ok(Some(f(owner))),
        }
    }
}

impl fmt::Debug for LengthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthSource::Rest => write!(f, "Rest"),
            LengthSource::Fixed(n) => write!(f, "Fixed({n})"),
            LengthSource::Field(name) => write!(f, "Field({name})"),
            LengthSource::Callback(_) => write!(f, "Callback"),
        }
    }
}

/// 数组元素个数来源
#[derive(Debug, Clone)]
pub enum CountSource {
    /// 结构中另一个计数字段
    Counter(String),
    /// 在分配的字节范围内持续读取直到耗尽
    Budget(LengthSource),
}

/// 枚举表：值与名称的双向映射
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnumTable {
    entries: Vec<(String, u64)>,
}

impl EnumTable {
    pub fn new(entries: &[(&str, u64)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        }
    }

    pub fn from_entries(entries: Vec<(String, u64)>) -> Self {
        Self { entries }
    }

    /// 值 -> 名称；未知值返回 `None`
    pub fn name_of(&self, value: u64) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(name, _)| name.as_str())
    }

    /// 名称 -> 值
    pub fn value_of(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| *value)
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }
}

/// 字段类型
#[derive(Clone)]
pub enum FieldKind {
    /// 定长无符号整数
    Int {
        width: IntWidth,
        endian: Endian,
        enums: Option<EnumTable>,
    },
    /// 字节串
    Bytes(LengthSource),
    /// 嵌套结构，委托给另一个头部类
    Struct(Arc<HeaderClass>),
    /// 重复数组
    Array {
        element: Box<FieldKind>,
        count: CountSource,
    },
    /// 净荷槽位：原始字节或被下一层头部占据
    Body(LengthSource),
}

impl FieldKind {
    pub fn int(width: IntWidth, endian: Endian) -> Self {
        FieldKind::Int {
            width,
            endian,
            enums: None,
        }
    }

    pub fn uint8() -> Self {
        Self::int(IntWidth::W8, Endian::Big)
    }

    pub fn uint16() -> Self {
        Self::int(IntWidth::W16, Endian::Big)
    }

    pub fn uint16le() -> Self {
        Self::int(IntWidth::W16, Endian::Little)
    }

    pub fn uint24() -> Self {
        Self::int(IntWidth::W24, Endian::Big)
    }

    pub fn uint32() -> Self {
        Self::int(IntWidth::W32, Endian::Big)
    }

    pub fn uint32le() -> Self {
        Self::int(IntWidth::W32, Endian::Little)
    }

    pub fn uint64() -> Self {
        Self::int(IntWidth::W64, Endian::Big)
    }

    pub fn bytes(length: LengthSource) -> Self {
        FieldKind::Bytes(length)
    }

    pub fn fixed_bytes(len: usize) -> Self {
        FieldKind::Bytes(LengthSource::Fixed(len))
    }

    pub fn rest() -> Self {
        FieldKind::Bytes(LengthSource::Rest)
    }

    pub fn nested(class: &Arc<HeaderClass>) -> Self {
        FieldKind::Struct(class.clone())
    }

    pub fn array(element: FieldKind, count: CountSource) -> Self {
        FieldKind::Array {
            element: Box::new(element),
            count,
        }
    }

    pub fn body() -> Self {
        FieldKind::Body(LengthSource::Rest)
    }

    pub fn body_sized(length: LengthSource) -> Self {
        FieldKind::Body(length)
    }

    /// 为整数字段附加枚举表，其他类型保持不变
    pub fn with_enum(self, entries: &[(&str, u64)]) -> Self {
        self.with_enum_table(EnumTable::new(entries))
    }

    pub fn with_enum_table(self, table: EnumTable) -> Self {
        match self {
            FieldKind::Int { width, endian, .. } => FieldKind::Int {
                width,
                endian,
                enums: Some(table),
            },
            other => other,
        }
    }

    /// 枚举表（仅整数字段）
    pub fn enum_table(&self) -> Option<&EnumTable> {
        match self {
            FieldKind::Int { enums, .. } => enums.as_ref(),
            _ => None,
        }
    }

    /// 未设置默认值时的初值
    pub fn zero_value(&self) -> FieldValue {
        match self {
            FieldKind::Int { .. } => FieldValue::Int(0),
            FieldKind::Bytes(LengthSource::Fixed(n)) => FieldValue::Bytes(vec![0; *n]),
            FieldKind::Bytes(_) => FieldValue::Bytes(Vec::new()),
            FieldKind::Struct(class) => FieldValue::Struct(Box::new(class.new_instance())),
            FieldKind::Array { .. } => FieldValue::Array(Vec::new()),
            FieldKind::Body(_) => FieldValue::Body(Body::Raw(Bytes::new())),
        }
    }

    /// 值的类型是否与字段类型匹配
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (FieldKind::Int { .. }, FieldValue::Int(_)) => true,
            (FieldKind::Bytes(_), FieldValue::Bytes(_)) => true,
            (FieldKind::Struct(class), FieldValue::Struct(header)) => {
                header.class_name() == class.name()
            }
            (FieldKind::Array { element, .. }, FieldValue::Array(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            (FieldKind::Body(_), FieldValue::Body(_)) => true,
            _ => false,
        }
    }

    /// 类型名称（用于错误信息与调试输出）
    pub fn type_name(&self) -> String {
        match self {
            FieldKind::Int { width, endian, .. } => {
                let suffix = match (width, endian) {
                    (IntWidth::W8, _) | (_, Endian::Big) => "",
                    (_, Endian::Little) => "le",
                };
                format!("u{}{}", width.bits(), suffix)
            }
            FieldKind::Bytes(_) => "bytes".to_string(),
            FieldKind::Struct(class) => format!("struct {}", class.name()),
            FieldKind::Array { element, .. } => format!("array<{}>", element.type_name()),
            FieldKind::Body(_) => "body".to_string(),
        }
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Int { enums, .. } => {
                write!(f, "{}", self.type_name())?;
                if enums.is_some() {
                    write!(f, " (enum)")?;
                }
                Ok(())
            }
            FieldKind::Bytes(length) => write!(f, "bytes[{length:?}]"),
            FieldKind::Struct(class) => write!(f, "struct {}", class.name()),
            FieldKind::Array { element, count } => write!(f, "array<{element:?}>[{count:?}]"),
            FieldKind::Body(length) => write!(f, "body[{length:?}]"),
        }
    }
}
