//! 解析驱动保护条件测试
//!
//! 验证无匹配时的终止、零长度头部与深度限制

use std::sync::Arc;

use pcraft_bind::{BindingRegistry, BindingRule};
use pcraft_core::{FieldKind, HeaderClass};
use pcraft_dissect::{DissectConfig, Dissector};

/// 只有净荷字段的头部类自我绑定：每一步都不消耗首部字节
fn pathological_registry() -> Arc<BindingRegistry> {
    let mut registry = BindingRegistry::new();
    registry
        .register(
            HeaderClass::builder("Hollow")
                .field("body", FieldKind::body())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .bind(
            "Hollow",
            "Hollow",
            BindingRule::proc(|_| true, |_| Ok(())),
        )
        .unwrap();
    Arc::new(registry)
}

#[test]
fn test_zero_consumption_stops_after_one_step() {
    // 1. 64字节的测试缓冲区
    let raw: Vec<u8> = (0..64u8).collect();

    // 2. 解析只产生一个头部
    let packet = Dissector::new(pathological_registry())
        .dissect(&raw, "Hollow")
        .unwrap();
    assert_eq!(packet.len(), 1);

    // 3. 字节完整保留
    assert_eq!(packet.body().len(), 64);
    assert_eq!(packet.to_bytes(), raw);
}

#[test]
fn test_zero_consumption_bounded_by_depth_when_guard_disabled() {
    let raw = vec![0u8; 64];
    let config = DissectConfig {
        max_headers: Some(5),
        stop_on_zero_length: false,
        lenient_truncation: false,
    };
    let packet = Dissector::new(pathological_registry())
        .with_config(config)
        .dissect(&raw, "Hollow")
        .unwrap();
    assert_eq!(packet.len(), 5);
    assert_eq!(packet.to_bytes(), raw);
}

#[test]
fn test_zero_consumption_guard_forced_without_depth_limit() {
    let raw = vec![0u8; 64];
    let config = DissectConfig {
        max_headers: None,
        stop_on_zero_length: false,
        lenient_truncation: false,
    };
    let packet = Dissector::new(pathological_registry())
        .with_config(config)
        .dissect(&raw, "Hollow")
        .unwrap();
    assert_eq!(packet.len(), 1);
}

#[test]
fn test_no_match_reproduces_buffer() {
    let mut registry = BindingRegistry::new();
    registry
        .register(
            HeaderClass::builder("Tag")
                .field("id", FieldKind::uint16())
                .field("len", FieldKind::uint8())
                .field("opt", FieldKind::bytes(pcraft_core::LengthSource::field("len")))
                .field("body", FieldKind::body())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .bind("Tag", "Tag", BindingRule::equals("id", 0x0001))
        .unwrap();
    let dissector = Dissector::new(Arc::new(registry));

    // 第二个Tag的id不匹配任何候选，剩余字节成为它的不透明净荷
    let raw = hex::decode("000102AAAA 0009 00 DEADBEEF".replace(' ', "")).unwrap();
    let packet = dissector.dissect(&raw, "Tag").unwrap();
    assert_eq!(packet.len(), 2);
    assert_eq!(packet.body().as_ref(), &[0xDE, 0xAD, 0xBE, 0xEF]);

    let mut rebuilt = Vec::new();
    for header in packet.headers() {
        rebuilt.extend(header.to_bytes_without_body());
    }
    rebuilt.extend_from_slice(&packet.body());
    assert_eq!(rebuilt, raw);
    assert_eq!(packet.to_bytes(), raw);
}

#[test]
fn test_trailer_bytes_count_as_consumed() {
    // 1. 净荷在前、尾部字段在后的头部类
    let mut registry = BindingRegistry::new();
    registry
        .register(
            HeaderClass::builder("Trailered")
                .field("payload", FieldKind::body_sized(pcraft_core::LengthSource::Fixed(2)))
                .field("kind", FieldKind::uint16())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            HeaderClass::builder("Word")
                .field("w", FieldKind::uint16())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .bind("Trailered", "Word", BindingRule::equals("kind", 7))
        .unwrap();

    // 2. 首部长度为0但消耗了2字节尾部，继续解析下一层
    let raw = [0xAB, 0xCD, 0x00, 0x07];
    let packet = Dissector::new(Arc::new(registry)).dissect(&raw, "Trailered").unwrap();
    assert_eq!(packet.to_string(), "Trailered / Word");
    assert_eq!(packet.find("Word").unwrap().uint("w").unwrap(), 0xABCD);
    assert_eq!(packet.to_bytes(), raw.to_vec());
}
