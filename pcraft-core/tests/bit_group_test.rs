//! 位字段组测试
//!
//! 验证子字段读写互不干扰，以及父整数是子字段的按位组合

use pcraft_core::{FieldKind, HeaderClass};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn tcp_like_class() -> std::sync::Arc<HeaderClass> {
    HeaderClass::builder("Flags")
        .field("off_flags", FieldKind::uint16())
        .define_bit_group(
            "off_flags",
            &[
                ("dataofs", 4),
                ("reserved", 3),
                ("ns", 1),
                ("cwr", 1),
                ("ece", 1),
                ("urg", 1),
                ("ack", 1),
                ("psh", 1),
                ("rst", 1),
                ("syn", 1),
                ("fin", 1),
            ],
        )
        .build()
        .unwrap()
}

#[test]
fn test_sub_field_writes_are_isolated() {
    // 1. 准备头部类与随机数
    let class = tcp_like_class();
    let names: Vec<String> = class
        .bit_group("off_flags")
        .unwrap()
        .fields()
        .iter()
        .map(|f| f.name.clone())
        .collect();
    let widths: Vec<u32> = class
        .bit_group("off_flags")
        .unwrap()
        .fields()
        .iter()
        .map(|f| f.width)
        .collect();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    // 2. 随机写某个子字段，其他子字段保持不变
    let mut header = class.new_instance();
    let mut expected = vec![0u64; names.len()];
    for _ in 0..500 {
        let i = rng.gen_range(0..names.len());
        let value: u64 = rng.gen_range(0..(1u64 << widths[i]));
        header.set_uint(&names[i], value).unwrap();
        expected[i] = value;

        for (j, name) in names.iter().enumerate() {
            assert_eq!(header.uint(name).unwrap(), expected[j], "sub-field {name}");
        }
    }

    // 3. 父整数等于按位组合
    let group = class.bit_group("off_flags").unwrap();
    assert_eq!(header.uint("off_flags").unwrap(), group.compose(&expected));
}

#[test]
fn test_excess_bits_are_masked() {
    let class = tcp_like_class();
    let mut header = class.new_instance();
    header.set_uint("syn", 1).unwrap();

    // dataofs只有4比特，0x1F被截断为0xF
    header.set_uint("dataofs", 0x1F).unwrap();
    assert_eq!(header.uint("dataofs").unwrap(), 0xF);
    assert_eq!(header.uint("reserved").unwrap(), 0);
    assert!(header.flag("syn").unwrap());
    assert_eq!(header.uint("off_flags").unwrap(), 0xF002);
}

#[test]
fn test_parent_write_updates_sub_fields() {
    let class = tcp_like_class();
    let (header, used) = class.deserialize(&[0x50, 0x12]).unwrap();
    assert_eq!(used, 2);
    assert_eq!(header.uint("dataofs").unwrap(), 5);
    assert!(header.flag("syn").unwrap());
    assert!(header.flag("ack").unwrap());
    assert!(!header.flag("fin").unwrap());
}
