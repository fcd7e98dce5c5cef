//! 链路层：Ethernet、802.1Q、ARP

use std::sync::Arc;

use pcraft_core::{FieldKind, FieldOptions, FieldValue, Header, HeaderClass, LengthSource, ProtocolError};

pub const ETHERNET: &str = "Ethernet";
pub const DOT1Q: &str = "Dot1Q";
pub const ARP: &str = "ARP";

pub const ETHERTYPE_IPV4: u64 = 0x0800;
pub const ETHERTYPE_ARP: u64 = 0x0806;
pub const ETHERTYPE_DOT1Q: u64 = 0x8100;
pub const ETHERTYPE_IPV6: u64 = 0x86DD;

fn ethertype() -> FieldKind {
    FieldKind::uint16().with_enum(&[
        ("IPv4", ETHERTYPE_IPV4),
        ("ARP", ETHERTYPE_ARP),
        ("802.1Q", ETHERTYPE_DOT1Q),
        ("IPv6", ETHERTYPE_IPV6),
    ])
}

/// 交换两个字段的值
pub(crate) fn swap_fields(header: &mut Header, a: &str, b: &str) -> Result<(), ProtocolError> {
    let first = header.get(a)?.clone();
    let second = header.get(b)?.clone();
    header.set(a, second)?;
    header.set(b, first)
}

pub fn ethernet() -> Result<Arc<HeaderClass>, ProtocolError> {
    HeaderClass::builder(ETHERNET)
        .define_field(
            "dst",
            FieldKind::fixed_bytes(6),
            FieldOptions::new().default_value([0xFFu8; 6]),
        )
        .field("src", FieldKind::fixed_bytes(6))
        .define_field("type", ethertype(), FieldOptions::new().default_value(0x9000u16))
        .field("payload", FieldKind::body())
        .on_invert(|h| swap_fields(h, "dst", "src"))
        .build()
}

pub fn dot1q() -> Result<Arc<HeaderClass>, ProtocolError> {
    HeaderClass::builder(DOT1Q)
        .define_field("tci", FieldKind::uint16(), FieldOptions::new().default_value(1u16))
        .define_bit_group("tci", &[("prio", 3), ("dei", 1), ("vlan", 12)])
        .define_field("type", ethertype(), FieldOptions::new().default_value(0x9000u16))
        .field("payload", FieldKind::body())
        .build()
}

/// 地址长度由 hwlen/plen 决定，默认值按当前长度补零
fn address(len_field: &'static str) -> (FieldKind, FieldOptions) {
    (
        FieldKind::bytes(LengthSource::field(len_field)),
        FieldOptions::new().default_with(move |h| {
            FieldValue::Bytes(vec![0; h.uint(len_field).unwrap_or(0) as usize])
        }),
    )
}

pub fn arp() -> Result<Arc<HeaderClass>, ProtocolError> {
    let (hw_kind, hw_opts) = address("hwlen");
    let (p_kind, p_opts) = address("plen");
    HeaderClass::builder(ARP)
        .define_field("hwtype", FieldKind::uint16(), FieldOptions::new().default_value(1u16))
        .define_field("ptype", ethertype(), FieldOptions::new().default_value(0x0800u16))
        .define_field("hwlen", FieldKind::uint8(), FieldOptions::new().default_value(6u8))
        .define_field("plen", FieldKind::uint8(), FieldOptions::new().default_value(4u8))
        .define_field(
            "op",
            FieldKind::uint16().with_enum(&[("who-has", 1), ("is-at", 2)]),
            FieldOptions::new().default_value(1u16),
        )
        .define_field("hwsrc", hw_kind.clone(), hw_opts.clone())
        .define_field("psrc", p_kind.clone(), p_opts.clone())
        .define_field("hwdst", hw_kind, hw_opts)
        .define_field("pdst", p_kind, p_opts)
        .on_invert(|h| {
            swap_fields(h, "hwsrc", "hwdst")?;
            swap_fields(h, "psrc", "pdst")?;
            if h.uint("op")? == 1 {
                h.set_uint("op", 2)?;
            }
            Ok(())
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ethernet_defaults() {
        let header = ethernet().unwrap().new_instance();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[..6], &[0xFF; 6]);
        assert_eq!(&bytes[12..], &[0x90, 0x00]);
    }

    #[test]
    fn test_dot1q_tci_bits() {
        let mut header = dot1q().unwrap().new_instance();
        header.set_uint("prio", 5).unwrap();
        header.set_uint("vlan", 100).unwrap();
        assert_eq!(header.uint("tci").unwrap(), 0xA064);
    }

    #[test]
    fn test_arp_address_lengths_follow_len_fields() {
        let class = arp().unwrap();
        let header = class.new_instance();
        assert_eq!(header.bytes("hwsrc").unwrap().len(), 6);
        assert_eq!(header.bytes("pdst").unwrap().len(), 4);
        assert_eq!(header.size(), 28);
        assert!(!class.has_body());

        let (parsed, used) = class.deserialize(&header.to_bytes()).unwrap();
        assert_eq!(used, 28);
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_arp_invert() {
        let mut header = arp().unwrap().new_instance();
        header.set_bytes("psrc", &[10, 0, 0, 1]).unwrap();
        header.set_bytes("pdst", &[10, 0, 0, 2]).unwrap();
        header.invert().unwrap();
        assert_eq!(header.bytes("psrc").unwrap(), &[10, 0, 0, 2]);
        assert_eq!(header.symbol("op").unwrap(), Some("is-at"));
    }
}
