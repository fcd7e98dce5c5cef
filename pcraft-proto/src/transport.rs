//! 传输层：TCP、UDP
//!
//! 两者的校验和都覆盖伪首部，需要报文中的外层 IPv4/IPv6 头部

use std::sync::Arc;

use pcraft_core::checksum::internet_checksum_parts;
use pcraft_core::{
    set_length_field, CountSource, FieldKind, FieldOptions, Header, HeaderClass, HeaderEnv,
    LengthSource, ProtocolError,
};

use crate::inet::{IPV4, PROTO_TCP, PROTO_UDP};
use crate::inet6::IPV6;
use crate::l2::swap_fields;

pub const TCP: &str = "TCP";
pub const TCP_OPTION: &str = "TCPOption";
pub const UDP: &str = "UDP";

/// 伪首部
///
/// # 参数
/// - `ip`: 外层 IPv4 或 IPv6 头部
/// - `proto`: 上层协议号
/// - `len`: 上层报文长度
pub fn pseudo_header(ip: &Header, proto: u64, len: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(40);
    out.extend_from_slice(ip.bytes("src")?);
    out.extend_from_slice(ip.bytes("dst")?);
    if ip.is(IPV6) {
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, proto as u8]);
    } else {
        out.extend_from_slice(&[0, proto as u8]);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
    Ok(out)
}

/// 带伪首部的传输层校验和
fn transport_checksum(h: &mut Header, env: &dyn HeaderEnv, proto: u64) -> Result<u16, ProtocolError> {
    h.set_uint("chksum", 0)?;
    let header = h.to_bytes_without_body();
    let body = env.body_bytes(h);
    let ip = env.outer(h, &[IPV4, IPV6])?;
    let pseudo = pseudo_header(ip, proto, header.len() + body.len())?;
    Ok(internet_checksum_parts(&[pseudo.as_slice(), header.as_slice(), body.as_slice()]))
}

/// TCP选项：EOL/NOP只有一个字节，其余为 kind/length/data
pub fn tcp_option() -> Result<Arc<HeaderClass>, ProtocolError> {
    let has_length = |h: &Header| h.uint("kind").unwrap_or(0) > 1;
    HeaderClass::builder(TCP_OPTION)
        .field(
            "kind",
            FieldKind::uint8().with_enum(&[
                ("EOL", 0),
                ("NOP", 1),
                ("MSS", 2),
                ("WScale", 3),
                ("SAckOK", 4),
                ("SAck", 5),
                ("Timestamp", 8),
            ]),
        )
        .define_field(
            "length",
            FieldKind::uint8(),
            FieldOptions::new().default_value(2u8).optional(has_length),
        )
        .define_field(
            "data",
            FieldKind::bytes(LengthSource::callback(|h| {
                h.uint("length").unwrap_or(2).saturating_sub(2) as usize
            })),
            FieldOptions::new().optional(has_length),
        )
        .build()
}

pub fn tcp(option: &Arc<HeaderClass>) -> Result<Arc<HeaderClass>, ProtocolError> {
    let eol = Arc::clone(option);
    HeaderClass::builder(TCP)
        .define_field("sport", FieldKind::uint16(), FieldOptions::new().default_value(20u16))
        .define_field("dport", FieldKind::uint16(), FieldOptions::new().default_value(80u16))
        .field("seq", FieldKind::uint32())
        .field("ack", FieldKind::uint32())
        .define_field(
            "off_flags",
            FieldKind::uint16(),
            FieldOptions::new().default_value(0x5002u16),
        )
        .define_bit_group(
            "off_flags",
            &[
                ("dataofs", 4),
                ("reserved", 3),
                ("flag_ns", 1),
                ("flag_cwr", 1),
                ("flag_ece", 1),
                ("flag_urg", 1),
                ("flag_ack", 1),
                ("flag_psh", 1),
                ("flag_rst", 1),
                ("flag_syn", 1),
                ("flag_fin", 1),
            ],
        )
        .define_field("window", FieldKind::uint16(), FieldOptions::new().default_value(8192u16))
        .field("chksum", FieldKind::uint16())
        .field("urgptr", FieldKind::uint16())
        .field(
            "options",
            FieldKind::array(
                FieldKind::nested(option),
                CountSource::Budget(LengthSource::callback(|h| {
                    (h.uint("dataofs").unwrap_or(5) as usize * 4).saturating_sub(20)
                })),
            ),
        )
        .field("payload", FieldKind::body())
        .validate_with(|h| h.uint("dataofs").unwrap_or(0) >= 5)
        .on_calc_length(move |h, _env| {
            // 选项用 EOL 补齐到4字节边界
            while h.header_len() % 4 != 0 {
                h.push_element("options", eol.new_instance())?;
            }
            set_length_field(h, "dataofs", h.header_len() / 4)
        })
        .on_calc_checksum(|h, env| {
            let sum = transport_checksum(h, env, PROTO_TCP)?;
            h.set_uint("chksum", sum as u64)
        })
        .on_invert(|h| swap_fields(h, "sport", "dport"))
        .build()
}

pub fn udp() -> Result<Arc<HeaderClass>, ProtocolError> {
    HeaderClass::builder(UDP)
        .define_field("sport", FieldKind::uint16(), FieldOptions::new().default_value(53u16))
        .define_field("dport", FieldKind::uint16(), FieldOptions::new().default_value(53u16))
        .define_field("len", FieldKind::uint16(), FieldOptions::new().default_value(8u16))
        .field("chksum", FieldKind::uint16())
        .field("payload", FieldKind::body())
        .on_calc_length(|h, env| {
            let len = h.header_len() + env.body_bytes(h).len();
            set_length_field(h, "len", len)
        })
        .on_calc_checksum(|h, env| {
            // 0 表示未计算校验和，按 RFC 768 用 0xFFFF 代替
            let sum = match transport_checksum(h, env, PROTO_UDP)? {
                0 => 0xFFFF,
                sum => sum,
            };
            h.set_uint("chksum", sum as u64)
        })
        .on_invert(|h| swap_fields(h, "sport", "dport"))
        .build()
}
