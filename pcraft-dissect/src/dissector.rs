//! 解析驱动
//!
//! 从起始头部类开始循环：反序列化 -> `parse?` 校验 -> 追加头部 ->
//! 由绑定注册表选出下一层头部类，直到没有候选、净荷为空或触发保护条件。
//! 未能识别的字节原样保留为最内层的不透明净荷

use std::sync::Arc;

use bytes::Bytes;
use pcraft_bind::BindingRegistry;
use pcraft_core::{HeaderClass, ProtocolError};

use crate::config::DissectConfig;
use crate::packet::Packet;

/// 解析驱动
#[derive(Debug, Clone)]
pub struct Dissector {
    registry: Arc<BindingRegistry>,
    config: DissectConfig,
}

impl Dissector {
    pub fn new(registry: Arc<BindingRegistry>) -> Self {
        Self {
            registry,
            config: DissectConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DissectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DissectConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    /// 从指定头部类开始解析
    ///
    /// # 参数
    /// - `data`: 原始字节
    /// - `first_class`: 最外层头部类名
    ///
    /// # 返回
    /// - `Ok(Packet)`: 解析结果，未识别的字节保留为不透明净荷
    /// - `Err(ProtocolError)`: 起始类未知，或数据截断（非宽松模式）
    pub fn dissect(&self, data: &[u8], first_class: &str) -> Result<Packet, ProtocolError> {
        let first = self.registry.require_class(first_class)?.clone();
        self.run(data, first)
    }

    /// 按链路层类型选出首层头部类后解析
    pub fn dissect_linktype(&self, data: &[u8], linktype: u32) -> Result<Packet, ProtocolError> {
        let first = self.registry.class_for_linktype(linktype)?.clone();
        self.run(data, first)
    }

    /// 猜测首层头部类：按登记顺序取第一个能完整解析、通过 `parse?`
    /// 且能绑定到下一层的类
    pub fn dissect_guess(&self, data: &[u8]) -> Result<Packet, ProtocolError> {
        let first = self
            .registry
            .classes()
            .iter()
            .find(|class| match class.deserialize(data) {
                Ok((header, _)) => {
                    class.parse_ok(&header) && self.registry.resolve_next_class(&header).is_some()
                }
                Err(_) => false,
            })
            .cloned()
            .ok_or(ProtocolError::UnknownFirstHeader)?;
        log::debug!("guessed first header {}", first.name());
        self.run(data, first)
    }

    fn run(&self, data: &[u8], first: Arc<HeaderClass>) -> Result<Packet, ProtocolError> {
        let mut packet = Packet::new(self.registry.clone());
        let mut remaining = Bytes::copy_from_slice(data);
        let mut target = first;

        loop {
            if let Some(max) = self.config.max_headers {
                if packet.len() >= max {
                    log::warn!(
                        "header limit {max} reached, {} bytes left opaque",
                        remaining.len()
                    );
                    break;
                }
            }

            log::trace!("dissecting {} bytes as {}", remaining.len(), target.name());
            let (header, consumed) = match target.deserialize(&remaining) {
                Ok(parsed) => parsed,
                Err(e @ ProtocolError::TruncatedInput { .. }) if self.config.lenient_truncation => {
                    log::debug!("{} truncated, keeping bytes opaque: {e}", target.name());
                    break;
                }
                Err(e) => return Err(e),
            };

            if !target.parse_ok(&header) {
                log::debug!("{} rejected by parse check, keeping bytes opaque", target.name());
                break;
            }

            let padding = remaining.slice(consumed..);
            let body = header.body_bytes().cloned();
            // 净荷之外消耗的字节（首部与尾部字段）
            let framing = consumed.saturating_sub(body.as_ref().map_or(0, |b| b.len()));
            packet.push_dissected(header, padding)?;

            // 没有净荷字段的头部是终点
            let Some(body) = body else {
                log::debug!("{} has no body, dissection ends", target.name());
                return Ok(packet);
            };
            remaining = body;

            if framing == 0 && (self.config.stop_on_zero_length || self.config.max_headers.is_none()) {
                log::warn!("{} consumed no header bytes, stopping", target.name());
                break;
            }
            if remaining.is_empty() {
                log::debug!("{} has an empty body", target.name());
                break;
            }

            let Some(next) = packet
                .headers()
                .last()
                .and_then(|h| self.registry.resolve_next_class(h))
            else {
                log::debug!("no next header after {}", target.name());
                break;
            };
            target = next.clone();
        }

        // 一个头部都没有解析出来时，全部字节作为净荷
        if packet.is_empty() {
            packet.set_payload(remaining);
        }
        Ok(packet)
    }
}
