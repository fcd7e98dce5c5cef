//! JSON格式的头部类描述
//!
//! 字段类型用简短的类型串表示，由nom解析：
//! `u8` `u16` `u16le` `u24` `u32` `u32le` `u64` `u64le`、
//! `bytes[6]` `bytes[len]` `bytes[..]`、`u16[count]` `u8[..]`、`body` `body[len]`

use std::sync::Arc;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, char, digit1};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::multi::many0_count;
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::field::{CountSource, EnumTable, FieldKind, FieldValue, LengthSource};
use crate::schema::{FieldOptions, HeaderClass};

/// 头部类描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderDescription {
    pub name: String,
    pub fields: Vec<FieldDescription>,
    #[serde(default)]
    pub bit_groups: Vec<BitGroupDescription>,
}

/// 字段描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    /// 整数默认值为数字，字节串默认值为十六进制字符串
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// [["IPv4", 2048], ...]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<(String, u64)>>,
}

/// 位字段组描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitGroupDescription {
    pub field: String,
    pub bits: Vec<(String, u32)>,
}

impl HeaderDescription {
    pub fn from_json(json_str: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json_str)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 生成头部类
    pub fn build(&self) -> Result<Arc<HeaderClass>, ProtocolError> {
        let mut builder = HeaderClass::builder(&self.name);
        for field in &self.fields {
            let mut kind = parse_field_type(&field.field_type)?;
            if let Some(entries) = &field.enum_values {
                kind = kind.with_enum_table(EnumTable::from_entries(entries.clone()));
            }
            let mut options = FieldOptions::new();
            if let Some(default) = &field.default {
                options = options.default_value(default_value(&field.name, default)?);
            }
            builder = builder.define_field(&field.name, kind, options);
        }
        for group in &self.bit_groups {
            let specs: Vec<(&str, u32)> = group
                .bits
                .iter()
                .map(|(name, width)| (name.as_str(), *width))
                .collect();
            builder = builder.define_bit_group(&group.field, &specs);
        }
        builder.build()
    }
}

fn default_value(field: &str, value: &Value) -> Result<FieldValue, ProtocolError> {
    match value {
        Value::Number(n) => n.as_u64().map(FieldValue::Int).ok_or_else(|| {
            ProtocolError::InvalidDescription(format!("default for '{field}' is not an unsigned integer"))
        }),
        Value::String(s) => hex::decode(s.replace([' ', ':'], ""))
            .map(FieldValue::Bytes)
            .map_err(|e| ProtocolError::InvalidDescription(format!("default for '{field}': {e}"))),
        other => Err(ProtocolError::InvalidDescription(format!(
            "unsupported default for '{field}': {other}"
        ))),
    }
}

/// 方括号中的长度/个数
#[derive(Debug, Clone, PartialEq, Eq)]
enum Extent {
    Count(usize),
    Rest,
    Named(String),
}

enum TypeExpr {
    Int(FieldKind),
    IntArray(FieldKind, Extent),
    Bytes(Extent),
    Body(Option<Extent>),
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn extent(input: &str) -> IResult<&str, Extent> {
    delimited(
        char('['),
        alt((
            value(Extent::Rest, tag("..")),
            map_res(digit1, |s: &str| s.parse::<usize>().map(Extent::Count)),
            map(identifier, |s: &str| Extent::Named(s.to_string())),
        )),
        char(']'),
    )(input)
}

fn int_type(input: &str) -> IResult<&str, FieldKind> {
    alt((
        value(FieldKind::uint16le(), tag("u16le")),
        value(FieldKind::uint32le(), tag("u32le")),
        value(
            FieldKind::int(crate::field::IntWidth::W64, crate::field::Endian::Little),
            tag("u64le"),
        ),
        value(FieldKind::uint8(), tag("u8")),
        value(FieldKind::uint16(), tag("u16")),
        value(FieldKind::uint24(), tag("u24")),
        value(FieldKind::uint32(), tag("u32")),
        value(FieldKind::uint64(), tag("u64")),
    ))(input)
}

fn type_expr(input: &str) -> IResult<&str, TypeExpr> {
    alt((
        map(preceded(tag("bytes"), extent), TypeExpr::Bytes),
        map(preceded(tag("body"), opt(extent)), TypeExpr::Body),
        map(pair(int_type, opt(extent)), |(kind, extent)| match extent {
            Some(extent) => TypeExpr::IntArray(kind, extent),
            None => TypeExpr::Int(kind),
        }),
    ))(input)
}

fn length_of(extent: Extent) -> LengthSource {
    match extent {
        Extent::Count(n) => LengthSource::Fixed(n),
        Extent::Rest => LengthSource::Rest,
        Extent::Named(name) => LengthSource::Field(name),
    }
}

/// 解析字段类型串
pub fn parse_field_type(type_str: &str) -> Result<FieldKind, ProtocolError> {
    let (_, expr) = all_consuming(type_expr)(type_str.trim()).map_err(|e| {
        ProtocolError::InvalidDescription(format!("Invalid field type '{type_str}': {e}"))
    })?;

    Ok(match expr {
        TypeExpr::Int(kind) => kind,
        TypeExpr::Bytes(extent) => FieldKind::bytes(length_of(extent)),
        TypeExpr::Body(None) => FieldKind::body(),
        TypeExpr::Body(Some(extent)) => FieldKind::body_sized(length_of(extent)),
        TypeExpr::IntArray(kind, extent) => {
            let count = match extent {
                Extent::Named(counter) => CountSource::Counter(counter),
                // 数字表示元素个数，换算成字节范围
                Extent::Count(n) => {
                    let width = match &kind {
                        FieldKind::Int { width, .. } => width.bytes(),
                        _ => 1,
                    };
                    CountSource::Budget(LengthSource::Fixed(n * width))
                }
                Extent::Rest => CountSource::Budget(LengthSource::Rest),
            };
            FieldKind::array(kind, count)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Endian, IntWidth};

    #[test]
    fn test_parse_int_types() {
        assert!(matches!(
            parse_field_type("u16le").unwrap(),
            FieldKind::Int {
                width: IntWidth::W16,
                endian: Endian::Little,
                ..
            }
        ));
        assert!(matches!(
            parse_field_type("u24").unwrap(),
            FieldKind::Int {
                width: IntWidth::W24,
                endian: Endian::Big,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_byte_strings() {
        assert!(matches!(
            parse_field_type("bytes[6]").unwrap(),
            FieldKind::Bytes(LengthSource::Fixed(6))
        ));
        assert!(matches!(
            parse_field_type("bytes[..]").unwrap(),
            FieldKind::Bytes(LengthSource::Rest)
        ));
        match parse_field_type("bytes[opt_len]").unwrap() {
            FieldKind::Bytes(LengthSource::Field(name)) => assert_eq!(name, "opt_len"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_arrays_and_body() {
        match parse_field_type("u16[count]").unwrap() {
            FieldKind::Array {
                count: CountSource::Counter(name),
                ..
            } => assert_eq!(name, "count"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_field_type("u32[3]").unwrap(),
            FieldKind::Array {
                count: CountSource::Budget(LengthSource::Fixed(12)),
                ..
            }
        ));
        assert!(matches!(
            parse_field_type("body").unwrap(),
            FieldKind::Body(LengthSource::Rest)
        ));
        assert!(matches!(
            parse_field_type("body[len]").unwrap(),
            FieldKind::Body(LengthSource::Field(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["u12", "bytes", "bytes[", "u8[1x]", "body[]", "u16 extra"] {
            assert!(
                matches!(parse_field_type(bad), Err(ProtocolError::InvalidDescription(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_build_from_json() {
        let json = r#"{
            "name": "Mini",
            "fields": [
                {"name": "dst", "type": "bytes[6]", "default": "ff:ff:ff:ff:ff:ff"},
                {"name": "kind", "type": "u16", "default": 2048,
                 "enum_values": [["IPv4", 2048], ["ARP", 2054]]},
                {"name": "flags", "type": "u8"},
                {"name": "payload", "type": "body"}
            ],
            "bit_groups": [
                {"field": "flags", "bits": [["hi", 4], ["lo", 4]]}
            ]
        }"#;
        let desc = HeaderDescription::from_json(json).unwrap();
        let class = desc.build().unwrap();
        let header = class.new_instance();
        assert_eq!(header.bytes("dst").unwrap(), &[0xFF; 6]);
        assert_eq!(header.symbol("kind").unwrap(), Some("IPv4"));
        assert!(class.bit_field("lo").is_some());
        assert!(class.has_body());

        // 描述可以序列化回JSON再解析
        let again = HeaderDescription::from_json(&desc.to_json().unwrap()).unwrap();
        assert_eq!(again, desc);
    }

    #[test]
    fn test_bad_json_is_description_error() {
        let err = HeaderDescription::from_json("{\"name\": 1}").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidDescription(_)));
    }
}
