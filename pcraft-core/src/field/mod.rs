//! 字段类型系统
//!
//! 提供定长/变长二进制字段的类型描述、字段值、位字段组以及逐字段的编解码

pub mod bit_group;
pub(crate) mod codec;
pub mod kind;
pub mod value;

pub use bit_group::{BitField, BitGroup};
pub use kind::{CountSource, Endian, EnumTable, FieldKind, IntWidth, LengthFn, LengthSource};
pub use value::{Body, FieldValue};
