//! pcraft 核心库
//!
//! 字段类型系统与结构引擎：用声明式的字段模式描述协议头部，
//! 在字节缓冲区上顺序序列化/反序列化

pub mod description;
pub mod engine;
pub mod env;
pub mod error;
pub mod field;
pub mod header;
pub mod schema;
pub mod utils;

pub use description::{parse_field_type, BitGroupDescription, FieldDescription, HeaderDescription};
pub use env::{DetachedEnv, HeaderEnv};
pub use error::ProtocolError;
pub use field::{
    BitField, BitGroup, Body, CountSource, Endian, EnumTable, FieldKind, FieldValue, IntWidth,
    LengthFn, LengthSource,
};
pub use header::{Attachment, Header};
pub use schema::{
    CalcFn, DefaultFn, DefaultValue, FieldOptions, FieldSchema, HeaderClass, HeaderClassBuilder,
    HeaderHooks, InvertFn, Predicate,
};
pub use utils::checksum;
pub use utils::set_length_field;
