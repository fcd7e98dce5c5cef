//! IPv4、ICMP、IGMP

use std::sync::Arc;

use pcraft_core::checksum::{internet_checksum, internet_checksum_parts};
use pcraft_core::{
    set_length_field, FieldKind, FieldOptions, HeaderClass, LengthSource, ProtocolError,
};

use crate::l2::swap_fields;

pub const IPV4: &str = "IPv4";
pub const ICMP: &str = "ICMP";
pub const IGMP: &str = "IGMP";

pub const PROTO_ICMP: u64 = 1;
pub const PROTO_IGMP: u64 = 2;
pub const PROTO_TCP: u64 = 6;
pub const PROTO_UDP: u64 = 17;

pub(crate) fn ip_proto() -> FieldKind {
    FieldKind::uint8().with_enum(&[
        ("icmp", PROTO_ICMP),
        ("igmp", PROTO_IGMP),
        ("tcp", PROTO_TCP),
        ("udp", PROTO_UDP),
        ("ipv6-icmp", 58),
    ])
}

pub fn ipv4() -> Result<Arc<HeaderClass>, ProtocolError> {
    HeaderClass::builder(IPV4)
        .define_field("vihl", FieldKind::uint8(), FieldOptions::new().default_value(0x45u8))
        .define_bit_group("vihl", &[("version", 4), ("ihl", 4)])
        .field("tos", FieldKind::uint8())
        .define_field("len", FieldKind::uint16(), FieldOptions::new().default_value(20u16))
        .define_field("id", FieldKind::uint16(), FieldOptions::new().default_value(1u16))
        .field("frag", FieldKind::uint16())
        .define_bit_group(
            "frag",
            &[("flag_rsv", 1), ("flag_df", 1), ("flag_mf", 1), ("offset", 13)],
        )
        .define_field("ttl", FieldKind::uint8(), FieldOptions::new().default_value(64u8))
        .field("proto", ip_proto())
        .field("chksum", FieldKind::uint16())
        .define_field(
            "src",
            FieldKind::fixed_bytes(4),
            FieldOptions::new().default_value([127u8, 0, 0, 1]),
        )
        .define_field(
            "dst",
            FieldKind::fixed_bytes(4),
            FieldOptions::new().default_value([127u8, 0, 0, 1]),
        )
        .field(
            "options",
            FieldKind::bytes(LengthSource::callback(|h| {
                (h.uint("ihl").unwrap_or(5) as usize * 4).saturating_sub(20)
            })),
        )
        // 净荷以总长度为界，之后的字节（如以太网填充）留在报文的填充中
        .field(
            "payload",
            FieldKind::body_sized(LengthSource::callback(|h| {
                let len = h.uint("len").unwrap_or(0) as usize;
                len.saturating_sub(h.uint("ihl").unwrap_or(5) as usize * 4)
            })),
        )
        .validate_with(|h| h.uint("version").ok() == Some(4) && h.uint("ihl").unwrap_or(0) >= 5)
        .on_calc_length(|h, env| {
            // 选项补零到4字节边界
            let mut options = h.bytes("options")?.to_vec();
            if options.len() % 4 != 0 {
                options.resize((options.len() + 3) / 4 * 4, 0);
                h.set_bytes("options", &options)?;
            }
            set_length_field(h, "ihl", (20 + options.len()) / 4)?;
            let total = h.header_len() + env.body_bytes(h).len();
            set_length_field(h, "len", total)
        })
        .on_calc_checksum(|h, _env| {
            h.set_uint("chksum", 0)?;
            let sum = internet_checksum(&h.to_bytes_without_body());
            h.set_uint("chksum", sum as u64)
        })
        .on_invert(|h| swap_fields(h, "src", "dst"))
        .build()
}

pub fn icmp() -> Result<Arc<HeaderClass>, ProtocolError> {
    HeaderClass::builder(ICMP)
        .define_field(
            "type",
            FieldKind::uint8().with_enum(&[
                ("echo-reply", 0),
                ("dest-unreach", 3),
                ("echo-request", 8),
                ("time-exceeded", 11),
            ]),
            FieldOptions::new().default_value(8u8),
        )
        .field("code", FieldKind::uint8())
        .field("chksum", FieldKind::uint16())
        .field("id", FieldKind::uint16())
        .field("seq", FieldKind::uint16())
        .field("payload", FieldKind::body())
        .on_calc_checksum(|h, env| {
            h.set_uint("chksum", 0)?;
            let header = h.to_bytes_without_body();
            let body = env.body_bytes(h);
            let sum = internet_checksum_parts(&[header.as_slice(), body.as_slice()]);
            h.set_uint("chksum", sum as u64)
        })
        .on_invert(|h| {
            if h.uint("type")? == 8 {
                h.set_uint("type", 0)?;
            }
            Ok(())
        })
        .build()
}

/// IGMPv2，没有净荷
pub fn igmp() -> Result<Arc<HeaderClass>, ProtocolError> {
    HeaderClass::builder(IGMP)
        .define_field(
            "type",
            FieldKind::uint8().with_enum(&[
                ("membership-query", 0x11),
                ("v1-report", 0x12),
                ("v2-report", 0x16),
                ("leave-group", 0x17),
            ]),
            FieldOptions::new().default_value(0x11u8),
        )
        .define_field("mrcode", FieldKind::uint8(), FieldOptions::new().default_value(20u8))
        .field("chksum", FieldKind::uint16())
        .field("gaddr", FieldKind::fixed_bytes(4))
        .on_calc_checksum(|h, _env| {
            h.set_uint("chksum", 0)?;
            let sum = internet_checksum(&h.to_bytes());
            h.set_uint("chksum", sum as u64)
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_standalone_checksum() {
        // 经典示例：总长115字节的UDP报文的IP头部
        let mut raw = hex::decode("450000730000400040110000c0a80001c0a800c7").unwrap();
        raw.extend_from_slice(&[0u8; 95]);
        let class = ipv4().unwrap();
        let (mut header, used) = class.deserialize(&raw).unwrap();
        assert_eq!(used, 115);
        assert_eq!(header.header_len(), 20);
        assert!(class.parse_ok(&header));
        assert!(header.flag("flag_df").unwrap());
        assert_eq!(header.symbol("proto").unwrap(), Some("udp"));

        header.calc_checksum_with(&pcraft_core::DetachedEnv).unwrap();
        assert_eq!(header.uint("chksum").unwrap(), 0xb861);
    }

    #[test]
    fn test_ipv4_rejects_other_versions() {
        let class = ipv4().unwrap();
        let mut raw = vec![0u8; 20];
        raw[0] = 0x65;
        let (header, _) = class.deserialize(&raw).unwrap();
        assert!(!class.parse_ok(&header));
    }

    #[test]
    fn test_ipv4_options_follow_ihl() {
        let class = ipv4().unwrap();
        let mut header = class.new_instance();
        header.set_uint("ihl", 6).unwrap();
        let raw = [header.to_bytes_without_body(), vec![1, 1, 1, 0]].concat();
        // 默认选项为空，补上4字节选项后再解析
        assert_eq!(raw.len(), 24);
        let (parsed, used) = class.deserialize(&raw).unwrap();
        assert_eq!(used, 24);
        assert_eq!(parsed.bytes("options").unwrap(), &[1, 1, 1, 0]);
        assert_eq!(parsed.header_len(), 24);
    }

    #[test]
    fn test_ipv4_options_padded_to_words() {
        let class = ipv4().unwrap();
        let mut header = class.new_instance();
        header.set_bytes("options", &[1, 1, 1]).unwrap();

        header.calc_length_with(&pcraft_core::DetachedEnv).unwrap();
        assert_eq!(header.bytes("options").unwrap(), &[1, 1, 1, 0]);
        assert_eq!(header.uint("ihl").unwrap(), 6);
        assert_eq!(header.uint("len").unwrap(), 24);

        let (parsed, used) = class.deserialize(&header.to_bytes()).unwrap();
        assert_eq!(used, 24);
        assert_eq!(parsed.bytes("options").unwrap(), &[1, 1, 1, 0]);
    }

    #[test]
    fn test_igmp_checksum() {
        let mut header = igmp().unwrap().new_instance();
        header.set_bytes("gaddr", &[224, 0, 0, 1]).unwrap();
        header.calc().unwrap();
        assert_eq!(internet_checksum(&header.to_bytes()), 0);
    }
}
