//! 头部实例
//!
//! 一个头部实例持有某个头部类各字段的当前值，以及挂接到报文后的位置信息。
//! 位置信息只是 (报文ID, 下标)，不持有报文

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::field::{Body, FieldKind, FieldValue, LengthSource};
use crate::schema::{FieldSchema, HeaderClass};

/// 头部在报文中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub packet_id: u64,
    pub index: usize,
}

/// 头部实例
#[derive(Clone)]
pub struct Header {
    pub(crate) class: Arc<HeaderClass>,
    /// 与 `class.fields()` 一一对应；构建默认值期间可能只填充了前缀
    pub(crate) values: Vec<FieldValue>,
    pub(crate) attachment: Option<Attachment>,
}

impl Header {
    pub(crate) fn empty(class: &Arc<HeaderClass>) -> Self {
        Self {
            class: class.clone(),
            values: Vec::with_capacity(class.fields().len()),
            attachment: None,
        }
    }

    pub fn class(&self) -> &Arc<HeaderClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    /// 是否是指定类的实例
    pub fn is(&self, class_name: &str) -> bool {
        self.class.name() == class_name
    }

    pub fn attachment(&self) -> Option<Attachment> {
        self.attachment
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn detach(&mut self) {
        self.attachment = None;
    }

    fn position(&self, name: &str) -> Result<usize, ProtocolError> {
        let index = self
            .class
            .field_position(name)
            .ok_or_else(|| ProtocolError::FieldNotFound(format!("{}.{}", self.class_name(), name)))?;
        if index >= self.values.len() {
            // 默认值按声明顺序求值，后面的字段尚未填充
            return Err(ProtocolError::FieldNotFound(format!(
                "{}.{} (not populated yet)",
                self.class_name(),
                name
            )));
        }
        Ok(index)
    }

    fn schema(&self, index: usize) -> &FieldSchema {
        &self.class.fields()[index]
    }

    /// 字段当前值
    pub fn get(&self, name: &str) -> Result<&FieldValue, ProtocolError> {
        let index = self.position(name)?;
        Ok(&self.values[index])
    }

    /// 设置字段值
    ///
    /// 整数按声明宽度截断；定长字节串不足补零、超出截断；
    /// 位子字段只接受整数
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<(), ProtocolError> {
        let value = value.into();
        if self.class.field_position(name).is_none() && self.class.bit_field(name).is_some() {
            return match value {
                FieldValue::Int(v) => self.set_uint(name, v),
                other => Err(ProtocolError::invalid_value(
                    name,
                    format!("bit field takes an integer, got {}", other.type_name()),
                )),
            };
        }

        let index = self.position(name)?;
        let kind = self.schema(index).kind();
        if !kind.accepts(&value) {
            return Err(ProtocolError::invalid_value(
                name,
                format!("expected {}, got {}", kind.type_name(), value.type_name()),
            ));
        }
        let value = match (kind, value) {
            (FieldKind::Int { width, .. }, FieldValue::Int(v)) => FieldValue::Int(v & width.mask()),
            (FieldKind::Bytes(LengthSource::Fixed(n)), FieldValue::Bytes(mut data)) => {
                data.resize(*n, 0);
                FieldValue::Bytes(data)
            }
            (_, value) => value,
        };
        self.values[index] = value;
        Ok(())
    }

    /// 整数字段或位子字段的值
    pub fn uint(&self, name: &str) -> Result<u64, ProtocolError> {
        if let Some((parent, bit)) = self.class.bit_field(name) {
            let parent_value = self
                .values
                .get(parent)
                .and_then(FieldValue::as_int)
                .ok_or_else(|| ProtocolError::FieldNotFound(format!("{}.{}", self.class_name(), name)))?;
            return Ok(bit.extract(parent_value));
        }
        self.get(name)?
            .as_int()
            .ok_or_else(|| ProtocolError::invalid_value(name, "not an integer field"))
    }

    /// 设置整数字段或位子字段，超出宽度的比特被截掉，不做枚举校验
    pub fn set_uint(&mut self, name: &str, value: u64) -> Result<(), ProtocolError> {
        if let Some((parent, bit)) = self.class.bit_field(name) {
            let bit = bit.clone();
            let slot = self
                .values
                .get_mut(parent)
                .ok_or_else(|| ProtocolError::FieldNotFound(name.to_string()))?;
            let current = slot.as_int().unwrap_or(0);
            *slot = FieldValue::Int(bit.insert(current, value));
            return Ok(());
        }
        self.set(name, FieldValue::Int(value))
    }

    pub fn flag(&self, name: &str) -> Result<bool, ProtocolError> {
        Ok(self.uint(name)? != 0)
    }

    pub fn set_flag(&mut self, name: &str, on: bool) -> Result<(), ProtocolError> {
        self.set_uint(name, on as u64)
    }

    pub fn bytes(&self, name: &str) -> Result<&[u8], ProtocolError> {
        self.get(name)?
            .as_bytes()
            .ok_or_else(|| ProtocolError::invalid_value(name, "not a byte string field"))
    }

    pub fn set_bytes(&mut self, name: &str, data: &[u8]) -> Result<(), ProtocolError> {
        self.set(name, data)
    }

    /// 枚举字段当前值对应的名称；未知值返回 `None`
    pub fn symbol(&self, name: &str) -> Result<Option<&str>, ProtocolError> {
        let value = self.uint(name)?;
        let index = self.position(name)?;
        Ok(self
            .schema(index)
            .kind()
            .enum_table()
            .and_then(|table| table.name_of(value)))
    }

    /// 按名称设置枚举字段，名称不在枚举表中时报错
    pub fn set_symbol(&mut self, name: &str, symbol: &str) -> Result<(), ProtocolError> {
        let index = self.position(name)?;
        let table = self
            .schema(index)
            .kind()
            .enum_table()
            .ok_or_else(|| ProtocolError::invalid_value(name, "field has no enum table"))?;
        let value = table
            .value_of(symbol)
            .ok_or_else(|| ProtocolError::invalid_value(name, format!("unknown symbol '{symbol}'")))?;
        self.set_uint(name, value)
    }

    pub fn nested(&self, name: &str) -> Result<&Header, ProtocolError> {
        self.get(name)?
            .as_header()
            .ok_or_else(|| ProtocolError::invalid_value(name, "not a struct field"))
    }

    pub fn nested_mut(&mut self, name: &str) -> Result<&mut Header, ProtocolError> {
        let index = self.position(name)?;
        match &mut self.values[index] {
            FieldValue::Struct(header) => Ok(header.as_mut()),
            _ => Err(ProtocolError::invalid_value(name, "not a struct field")),
        }
    }

    pub fn array(&self, name: &str) -> Result<&[FieldValue], ProtocolError> {
        self.get(name)?
            .as_array()
            .ok_or_else(|| ProtocolError::invalid_value(name, "not an array field"))
    }

    /// 向数组字段追加一个元素
    pub fn push_element(&mut self, name: &str, element: impl Into<FieldValue>) -> Result<(), ProtocolError> {
        let element = element.into();
        let index = self.position(name)?;
        let FieldKind::Array { element: kind, .. } = self.class.fields()[index].kind() else {
            return Err(ProtocolError::invalid_value(name, "not an array field"));
        };
        if !kind.accepts(&element) {
            return Err(ProtocolError::invalid_value(
                name,
                format!("expected {}, got {}", kind.type_name(), element.type_name()),
            ));
        }
        match &mut self.values[index] {
            FieldValue::Array(items) => {
                items.push(element);
                Ok(())
            }
            _ => Err(ProtocolError::invalid_value(name, "not an array field")),
        }
    }

    /// 净荷槽位（无净荷字段时为 `None`）
    pub fn body(&self) -> Option<&Body> {
        let index = self.class.body_index()?;
        self.values.get(index).and_then(FieldValue::as_body)
    }

    /// 净荷中的原始字节（被封装时为 `None`）
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body().and_then(Body::as_raw)
    }

    pub fn set_body(&mut self, body: Body) -> Result<(), ProtocolError> {
        let index = self
            .class
            .body_index()
            .ok_or_else(|| ProtocolError::NotEncapsulating(self.class_name().to_string()))?;
        if index >= self.values.len() {
            return Err(ProtocolError::FieldNotFound(format!("{}.body", self.class_name())));
        }
        self.values[index] = FieldValue::Body(body);
        Ok(())
    }

    /// 字段当前是否出现在线上（可选字段谓词）
    pub fn is_present(&self, name: &str) -> bool {
        match self.class.field_position(name) {
            Some(index) if index < self.values.len() => self.schema(index).is_present(self),
            Some(_) => false,
            None => self
                .class
                .bit_field(name)
                .is_some_and(|(parent, _)| self.schema(parent).is_present(self)),
        }
    }

    /// 可读的多行输出
    pub fn inspect(&self) -> String {
        let mut out = String::new();
        self.inspect_into(&mut out, 0);
        out
    }

    fn inspect_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        out.push_str(&format!("{pad}###[ {} ]###\n", self.class_name()));
        for (index, schema) in self.class.fields().iter().enumerate() {
            let Some(value) = self.values.get(index) else {
                break;
            };
            if !schema.is_present(self) {
                continue;
            }
            let name = schema.name();
            match value {
                FieldValue::Int(v) => {
                    let symbol = schema
                        .kind()
                        .enum_table()
                        .and_then(|table| table.name_of(*v))
                        .map(|s| format!(" ({s})"))
                        .unwrap_or_default();
                    out.push_str(&format!("{pad}  {name:<16}= {v:#x}{symbol}\n"));
                    if let Some(group) = self.class.bit_group(name) {
                        for bit in group.fields() {
                            out.push_str(&format!(
                                "{pad}    {:<14}= {}\n",
                                bit.name,
                                bit.extract(*v)
                            ));
                        }
                    }
                }
                FieldValue::Bytes(data) => {
                    out.push_str(&format!("{pad}  {name:<16}= {}\n", hex::encode(data)));
                }
                FieldValue::Struct(header) => {
                    out.push_str(&format!("{pad}  {name:<16}=\n"));
                    header.inspect_into(out, depth + 2);
                }
                FieldValue::Array(items) => {
                    out.push_str(&format!("{pad}  {name:<16}= [{} items]\n", items.len()));
                    for item in items {
                        match item {
                            FieldValue::Struct(header) => header.inspect_into(out, depth + 2),
                            FieldValue::Int(v) => out.push_str(&format!("{pad}    {v:#x}\n")),
                            FieldValue::Bytes(data) => {
                                out.push_str(&format!("{pad}    {}\n", hex::encode(data)))
                            }
                            other => out.push_str(&format!("{pad}    {other:?}\n")),
                        }
                    }
                }
                FieldValue::Body(Body::Raw(data)) => {
                    out.push_str(&format!("{pad}  {name:<16}= <{} bytes>\n", data.len()));
                }
                FieldValue::Body(Body::Encapsulated) => {
                    out.push_str(&format!("{pad}  {name:<16}= <encapsulated>\n"));
                }
            }
        }
    }
}

impl PartialEq for Header {
    /// 比较类名与线上可见（当前出现）的字段
    fn eq(&self, other: &Self) -> bool {
        if self.class_name() != other.class_name() || self.values.len() != other.values.len() {
            return false;
        }
        self.class
            .fields()
            .iter()
            .enumerate()
            .all(|(index, schema)| {
                let present = schema.is_present(self);
                if present != schema.is_present(other) {
                    return false;
                }
                !present || self.values[index] == other.values[index]
            })
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.class_name());
        for (schema, value) in self.class.fields().iter().zip(&self.values) {
            s.field(schema.name(), value);
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{CountSource, FieldKind, LengthSource};
    use crate::schema::FieldOptions;

    fn demo_class() -> Arc<HeaderClass> {
        HeaderClass::builder("Demo")
            .define_field(
                "vihl",
                FieldKind::uint8(),
                FieldOptions::new().default_value(0x45u8),
            )
            .define_bit_group("vihl", &[("version", 4), ("ihl", 4)])
            .define_field(
                "proto",
                FieldKind::uint8().with_enum(&[("ICMP", 1), ("TCP", 6), ("UDP", 17)]),
                FieldOptions::new().default_value(6u8),
            )
            .field("flags", FieldKind::uint8())
            .define_bit_group("flags", &[("urgent", 1), ("rest", 7)])
            .field("addr", FieldKind::fixed_bytes(4))
            .field("count", FieldKind::uint8())
            .field(
                "items",
                FieldKind::array(FieldKind::uint16(), CountSource::Counter("count".into())),
            )
            .field("data", FieldKind::bytes(LengthSource::field("count")))
            .field("body", FieldKind::body())
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults_and_bit_fields() {
        let header = demo_class().new_instance();
        assert_eq!(header.uint("vihl").unwrap(), 0x45);
        assert_eq!(header.uint("version").unwrap(), 4);
        assert_eq!(header.uint("ihl").unwrap(), 5);
        assert_eq!(header.bytes("addr").unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_bit_field_write_keeps_siblings() {
        let mut header = demo_class().new_instance();
        header.set_uint("ihl", 0xF).unwrap();
        assert_eq!(header.uint("version").unwrap(), 4);
        assert_eq!(header.uint("vihl").unwrap(), 0x4F);

        // 超宽的值被截掉
        header.set_uint("version", 0x16).unwrap();
        assert_eq!(header.uint("version").unwrap(), 6);
        assert_eq!(header.uint("ihl").unwrap(), 0xF);

        header.set_flag("urgent", true).unwrap();
        assert!(header.flag("urgent").unwrap());
        assert_eq!(header.uint("flags").unwrap(), 0x80);
    }

    #[test]
    fn test_int_masked_to_width() {
        let mut header = demo_class().new_instance();
        header.set_uint("proto", 0x1234).unwrap();
        assert_eq!(header.uint("proto").unwrap(), 0x34);
    }

    #[test]
    fn test_symbolic_access() {
        let mut header = demo_class().new_instance();
        assert_eq!(header.symbol("proto").unwrap(), Some("TCP"));

        header.set_symbol("proto", "UDP").unwrap();
        assert_eq!(header.uint("proto").unwrap(), 17);

        let err = header.set_symbol("proto", "SCTP").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFieldValue { .. }));
        assert_eq!(header.uint("proto").unwrap(), 17);

        // 原始整数不做枚举校验
        header.set_uint("proto", 200).unwrap();
        assert_eq!(header.symbol("proto").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut header = demo_class().new_instance();
        assert!(header.set("addr", 5u64).is_err());
        assert!(header.set("proto", vec![1u8]).is_err());
        assert!(matches!(
            header.uint("missing"),
            Err(ProtocolError::FieldNotFound(_))
        ));
    }

    #[test]
    fn test_fixed_bytes_resized() {
        let mut header = demo_class().new_instance();
        header.set_bytes("addr", &[10, 0]).unwrap();
        assert_eq!(header.bytes("addr").unwrap(), &[10, 0, 0, 0]);
        header.set_bytes("addr", &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(header.bytes("addr").unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_push_element() {
        let mut header = demo_class().new_instance();
        header.push_element("items", 7u16).unwrap();
        assert_eq!(header.array("items").unwrap().len(), 1);
        assert!(header.push_element("items", vec![1u8]).is_err());
    }

    #[test]
    fn test_equality_ignores_attachment() {
        let class = demo_class();
        let a = class.new_instance();
        let mut b = class.new_instance();
        b.attach(Attachment {
            packet_id: 1,
            index: 0,
        });
        assert_eq!(a, b);
        b.set_uint("ihl", 6).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_inspect_lists_fields() {
        let header = demo_class().new_instance();
        let text = header.inspect();
        assert!(text.contains("###[ Demo ]###"));
        assert!(text.contains("(TCP)"));
        assert!(text.contains("version"));
    }
}
