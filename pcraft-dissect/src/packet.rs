//! 报文
//!
//! 报文按线上顺序（外层到内层）持有头部实例。第 i 个头部的净荷槽位
//! 要么是原始字节，要么是 `Body::Encapsulated`，由第 i+1 个头部填充。
//! 头部通过 `Attachment` 记录自己在哪个报文的哪个位置，报文不被头部持有

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use pcraft_bind::BindingRegistry;
use pcraft_core::{Attachment, Body, Header, HeaderEnv, ProtocolError};

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

fn next_packet_id() -> u64 {
    NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed)
}

/// `replace_body_with` 的替换内容
#[derive(Debug)]
pub enum Replacement {
    Bytes(Bytes),
    Packet(Packet),
}

/// 报文
#[derive(Debug)]
pub struct Packet {
    id: u64,
    headers: Vec<Header>,
    /// 与 `headers` 一一对应：头部之后、仍在外层净荷内的多余字节（如以太网填充）
    padding: Vec<Bytes>,
    /// 没有任何头部时的原始字节
    payload: Bytes,
    registry: Arc<BindingRegistry>,
}

impl Packet {
    /// 创建空报文
    pub fn new(registry: Arc<BindingRegistry>) -> Self {
        Self {
            id: next_packet_id(),
            headers: Vec::new(),
            padding: Vec::new(),
            payload: Bytes::new(),
            registry,
        }
    }

    /// 只包含原始字节的报文
    pub fn raw(registry: Arc<BindingRegistry>, data: &[u8]) -> Self {
        let mut packet = Self::new(registry);
        packet.payload = Bytes::copy_from_slice(data);
        packet
    }

    /// 以指定头部类的默认实例开始的报文
    pub fn gen(registry: Arc<BindingRegistry>, class: &str) -> Result<Self, ProtocolError> {
        let mut packet = Self::new(registry);
        packet.add(class)?;
        Ok(packet)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    fn reattach(&mut self) {
        let packet_id = self.id;
        for (index, header) in self.headers.iter_mut().enumerate() {
            header.attach(Attachment { packet_id, index });
        }
    }

    /// 解析时追加头部：前一个头部的原始净荷正好由新头部加填充字节构成
    pub(crate) fn push_dissected(&mut self, mut header: Header, padding: Bytes) -> Result<(), ProtocolError> {
        if let Some(last) = self.headers.last_mut() {
            last.set_body(Body::Encapsulated)?;
        }
        header.attach(Attachment {
            packet_id: self.id,
            index: self.headers.len(),
        });
        self.headers.push(header);
        self.padding.push(padding);
        Ok(())
    }

    pub(crate) fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }

    /// 追加指定类的默认实例作为最内层头部
    pub fn add(&mut self, class: &str) -> Result<&mut Header, ProtocolError> {
        let header = self.registry.require_class(class)?.new_instance();
        self.add_header(header)
    }

    /// 追加头部作为最内层，按绑定规则设置其外层头部的字段
    ///
    /// # 返回
    /// - `Err(ProtocolError::NotEncapsulating)`: 当前最内层头部没有净荷字段
    pub fn add_header(&mut self, header: Header) -> Result<&mut Header, ProtocolError> {
        if let Some(last) = self.headers.last_mut() {
            if !last.class().has_body() {
                return Err(ProtocolError::NotEncapsulating(last.class_name().to_string()));
            }
            bind_pair(&self.registry, last, header.class_name())?;
            if last.body_bytes().is_some_and(|raw| !raw.is_empty()) {
                log::debug!("raw body of {} replaced by {}", last.class_name(), header.class_name());
            }
            last.set_body(Body::Encapsulated)?;
        } else {
            self.payload = Bytes::new();
        }

        self.headers.push(header);
        self.padding.push(Bytes::new());
        self.reattach();
        let index = self.headers.len() - 1;
        Ok(&mut self.headers[index])
    }

    /// 在第 `after` 个头部之后插入指定类的默认实例
    pub fn insert(&mut self, after: usize, class: &str) -> Result<&mut Header, ProtocolError> {
        let new_class = self.registry.require_class(class)?.clone();
        if after >= self.headers.len() {
            return Err(ProtocolError::Other(format!(
                "Cannot insert after header {after}, packet has {}",
                self.headers.len()
            )));
        }
        if after + 1 == self.headers.len() {
            return self.add(class);
        }
        if !self.headers[after].class().has_body() {
            return Err(ProtocolError::NotEncapsulating(
                self.headers[after].class_name().to_string(),
            ));
        }
        if !new_class.has_body() {
            return Err(ProtocolError::NotEncapsulating(class.to_string()));
        }

        let mut header = new_class.new_instance();
        bind_pair(&self.registry, &mut self.headers[after], class)?;
        let inner_class = self.headers[after + 1].class_name().to_string();
        bind_pair(&self.registry, &mut header, &inner_class)?;
        header.set_body(Body::Encapsulated)?;

        self.headers.insert(after + 1, header);
        self.padding.insert(after + 1, Bytes::new());
        self.reattach();
        Ok(&mut self.headers[after + 1])
    }

    /// 移除第 `index` 个头部，返回被移除（已解除挂接）的头部
    ///
    /// 中间头部被移除时，其外层与内层头部按绑定规则重新衔接；
    /// 最内层头部被移除时，其原始净荷交还给外层头部
    pub fn decapsulate(&mut self, index: usize) -> Result<Header, ProtocolError> {
        if index >= self.headers.len() {
            return Err(ProtocolError::Other(format!(
                "No header at index {index}, packet has {}",
                self.headers.len()
            )));
        }

        let mut removed = self.headers.remove(index);
        let removed_padding = self.padding.remove(index);
        removed.detach();

        if index > 0 {
            let outer = index - 1;
            match self.headers.get(index).map(|h| h.class_name().to_string()) {
                Some(inner) => {
                    if let Some(container) = self.headers.get_mut(outer) {
                        bind_pair(&self.registry, container, &inner)?;
                    }
                }
                None => {
                    let raw = removed.body_bytes().cloned().unwrap_or_default();
                    let mut bytes = raw.to_vec();
                    bytes.extend_from_slice(&removed_padding);
                    self.headers[outer].set_body(Body::Raw(Bytes::from(bytes)))?;
                }
            }
        } else if self.headers.is_empty() {
            self.payload = removed.body_bytes().cloned().unwrap_or_default();
        }

        self.reattach();
        Ok(removed)
    }

    /// 把另一个报文接到最内层
    ///
    /// # 参数
    /// - `other`: 内层报文
    /// - `parsing`: 为真时表示解析得到的内容，不应用绑定规则
    pub fn encapsulate(&mut self, other: Packet, parsing: bool) -> Result<(), ProtocolError> {
        let Packet {
            headers,
            padding,
            payload,
            ..
        } = other;

        match self.headers.last_mut() {
            None => {
                self.headers = headers;
                self.padding = padding;
                self.payload = payload;
            }
            Some(last) => {
                if !last.class().has_body() {
                    return Err(ProtocolError::NotEncapsulating(last.class_name().to_string()));
                }
                match headers.first() {
                    Some(first) => {
                        if !parsing {
                            bind_pair(&self.registry, last, first.class_name())?;
                        }
                        last.set_body(Body::Encapsulated)?;
                    }
                    None => last.set_body(Body::Raw(payload))?,
                }
                self.headers.extend(headers);
                self.padding.extend(padding);
            }
        }

        self.reattach();
        Ok(())
    }

    /// 用字节或另一个报文替换第 `index` 个头部的净荷，原有的内层头部被丢弃
    pub fn replace_body_with(&mut self, index: usize, replacement: Replacement) -> Result<(), ProtocolError> {
        let header = self.headers.get(index).ok_or_else(|| {
            ProtocolError::Other(format!("No header at index {index}"))
        })?;
        if !header.class().has_body() {
            return Err(ProtocolError::NotEncapsulating(header.class_name().to_string()));
        }

        self.headers.truncate(index + 1);
        self.padding.truncate(index + 1);
        match replacement {
            Replacement::Bytes(data) => {
                self.headers[index].set_body(Body::Raw(data))?;
                self.reattach();
                Ok(())
            }
            Replacement::Packet(inner) => {
                self.headers[index].set_body(Body::Raw(Bytes::new()))?;
                self.encapsulate(inner, true)
            }
        }
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn header(&self, index: usize) -> Option<&Header> {
        self.headers.get(index)
    }

    pub fn header_mut(&mut self, index: usize) -> Option<&mut Header> {
        self.headers.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// 第一个指定类的头部
    pub fn find(&self, class: &str) -> Option<&Header> {
        self.find_nth(class, 0)
    }

    pub fn find_mut(&mut self, class: &str) -> Option<&mut Header> {
        self.headers.iter_mut().find(|h| h.is(class))
    }

    /// 第 n 个（从0开始）指定类的头部
    pub fn find_nth(&self, class: &str, n: usize) -> Option<&Header> {
        self.headers.iter().filter(|h| h.is(class)).nth(n)
    }

    pub fn position(&self, class: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.is(class))
    }

    /// 报文中是否包含指定类的头部
    pub fn is(&self, class: &str) -> bool {
        self.position(class).is_some()
    }

    /// 最内层的不透明字节
    pub fn body(&self) -> Bytes {
        match self.headers.last() {
            None => self.payload.clone(),
            Some(last) => match last.body() {
                Some(Body::Raw(data)) => data.clone(),
                _ => self.padding.last().cloned().unwrap_or_default(),
            },
        }
    }

    /// 设置最内层的不透明字节
    pub fn set_body(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let data = Bytes::copy_from_slice(data);
        match self.headers.last_mut() {
            None => self.payload = data,
            Some(last) if last.class().has_body() => last.set_body(Body::Raw(data))?,
            Some(_) => {
                if let Some(padding) = self.padding.last_mut() {
                    *padding = data;
                }
            }
        }
        Ok(())
    }

    fn write_from(&self, index: usize, out: &mut Vec<u8>) {
        let Some(header) = self.headers.get(index) else {
            return;
        };
        header.write_into(out, &mut |inner: &mut Vec<u8>| self.write_from(index + 1, inner));
        out.extend_from_slice(&self.padding[index]);
    }

    fn size_from(&self, index: usize) -> usize {
        match self.headers.get(index) {
            Some(header) => header.size_with(self.size_from(index + 1)) + self.padding[index].len(),
            None => 0,
        }
    }

    /// 第 `index` 个头部净荷序列化后的字节
    pub fn body_bytes_of(&self, index: usize) -> Vec<u8> {
        match self.headers.get(index).and_then(|h| h.body()) {
            Some(Body::Raw(data)) => data.to_vec(),
            Some(Body::Encapsulated) => {
                let mut out = Vec::with_capacity(self.size_from(index + 1));
                self.write_from(index + 1, &mut out);
                out
            }
            None => Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        if self.headers.is_empty() {
            self.payload.len()
        } else {
            self.size_from(0)
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if self.headers.is_empty() {
            return self.payload.to_vec();
        }
        let mut out = Vec::with_capacity(self.size());
        self.write_from(0, &mut out);
        out
    }

    /// 每行16字节的十六进制输出
    pub fn hexdump(&self) -> String {
        let mut out = String::new();
        for (line, chunk) in self.to_bytes().chunks(16).enumerate() {
            let hexed: Vec<String> = chunk.iter().map(|b| hex::encode([*b])).collect();
            out.push_str(&format!("{:04x}  {}\n", line * 16, hexed.join(" ")));
        }
        out
    }

    /// 所有头部的可读输出
    pub fn inspect(&self) -> String {
        let mut out: String = self.headers.iter().map(Header::inspect).collect();
        let body = self.body();
        if !body.is_empty() {
            out.push_str(&format!("###[ Raw ]###\n  load            = {}\n", hex::encode(&body)));
        }
        out
    }

    /// 最近的、类名在 `classes` 中的外层头部
    ///
    /// # 返回
    /// - `Err(ProtocolError::UnattachedHeader)`: 头部不属于本报文，或没有这样的外层头部
    pub fn outer_of(&self, header: &Header, classes: &[&str]) -> Result<&Header, ProtocolError> {
        let index = self.index_of(header)?;
        self.headers[..index]
            .iter()
            .rev()
            .find(|h| classes.contains(&h.class_name()))
            .ok_or_else(|| ProtocolError::UnattachedHeader {
                header: header.class_name().to_string(),
                reason: format!("no enclosing {} header", classes.join("/")),
            })
    }

    fn index_of(&self, header: &Header) -> Result<usize, ProtocolError> {
        let unattached = |reason: &str| ProtocolError::UnattachedHeader {
            header: header.class_name().to_string(),
            reason: reason.to_string(),
        };
        let attachment = header
            .attachment()
            .ok_or_else(|| unattached("not attached to a packet"))?;
        if attachment.packet_id != self.id {
            return Err(unattached("attached to another packet"));
        }
        match self.headers.get(attachment.index) {
            Some(h) if h.class_name() == header.class_name() => Ok(attachment.index),
            _ => Err(unattached("stale attachment")),
        }
    }

    /// 计算所有长度字段，从最内层开始
    pub fn calc_length(&mut self) -> Result<(), ProtocolError> {
        for index in (0..self.headers.len()).rev() {
            let mut header = self.headers[index].clone();
            header.calc_length_with(&PacketEnv { packet: &*self })?;
            self.headers[index] = header;
        }
        Ok(())
    }

    /// 计算所有校验和，从最内层开始
    pub fn calc_checksum(&mut self) -> Result<(), ProtocolError> {
        for index in (0..self.headers.len()).rev() {
            let mut header = self.headers[index].clone();
            header.calc_checksum_with(&PacketEnv { packet: &*self })?;
            self.headers[index] = header;
        }
        Ok(())
    }

    /// 先长度后校验和
    pub fn calc(&mut self) -> Result<(), ProtocolError> {
        self.calc_length()?;
        self.calc_checksum()
    }

    /// 交换各层源/目的后的副本
    pub fn reply(&self) -> Result<Packet, ProtocolError> {
        let mut packet = self.clone();
        packet.reply_in_place()?;
        Ok(packet)
    }

    pub fn reply_in_place(&mut self) -> Result<(), ProtocolError> {
        for header in &mut self.headers {
            header.invert()?;
        }
        Ok(())
    }
}

/// 有绑定时按规则设置容器字段，没有绑定时保持不变
fn bind_pair(registry: &BindingRegistry, container: &mut Header, candidate: &str) -> Result<(), ProtocolError> {
    match registry.apply_defaults(container, candidate) {
        Err(ProtocolError::NoBinding { .. }) => {
            log::debug!("no binding {} -> {}, fields left as is", container.class_name(), candidate);
            Ok(())
        }
        other => other,
    }
}

impl Clone for Packet {
    /// 副本是一个新报文，头部重新挂接到副本上
    fn clone(&self) -> Self {
        let mut packet = Self {
            id: next_packet_id(),
            headers: self.headers.clone(),
            padding: self.padding.clone(),
            payload: self.payload.clone(),
            registry: self.registry.clone(),
        };
        packet.reattach();
        packet
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.headers == other.headers && self.padding == other.padding && self.payload == other.payload
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.headers.iter().map(|h| h.class_name().to_string()).collect();
        let body = self.body();
        if !body.is_empty() {
            parts.push(format!("Raw({} bytes)", body.len()));
        }
        if parts.is_empty() {
            return write!(f, "<empty>");
        }
        write!(f, "{}", parts.join(" / "))
    }
}

/// 报文内头部的计算上下文
pub struct PacketEnv<'a> {
    pub packet: &'a Packet,
}

impl HeaderEnv for PacketEnv<'_> {
    fn body_bytes(&self, header: &Header) -> Vec<u8> {
        match self.packet.index_of(header) {
            Ok(index) => self.packet.body_bytes_of(index),
            Err(_) => header.body_bytes().map(|b| b.to_vec()).unwrap_or_default(),
        }
    }

    fn outer(&self, header: &Header, classes: &[&str]) -> Result<&Header, ProtocolError> {
        self.packet.outer_of(header, classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcraft_bind::BindingRule;
    use pcraft_core::{FieldKind, HeaderClass};

    fn registry() -> Arc<BindingRegistry> {
        let mut registry = BindingRegistry::new();
        registry
            .register(
                HeaderClass::builder("Outer")
                    .field("next", FieldKind::uint8())
                    .field("len", FieldKind::uint8())
                    .field("body", FieldKind::body_sized(pcraft_core::LengthSource::field("len")))
                    .field("crc", FieldKind::uint8())
                    .on_calc_length(|h, env| {
                        let size = env.body_bytes(h).len();
                        h.set_uint("len", size as u64)
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                HeaderClass::builder("Inner")
                    .field("tag", FieldKind::uint8())
                    .field("body", FieldKind::body())
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                HeaderClass::builder("Leaf")
                    .field("v", FieldKind::uint16())
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.bind("Outer", "Inner", BindingRule::equals("next", 1)).unwrap();
        registry.bind("Inner", "Leaf", BindingRule::equals("tag", 7)).unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_build_applies_bindings() {
        let mut packet = Packet::gen(registry(), "Outer").unwrap();
        packet.add("Inner").unwrap();
        packet.add("Leaf").unwrap().set_uint("v", 0xBEEF).unwrap();

        assert_eq!(packet.header(0).unwrap().uint("next").unwrap(), 1);
        assert_eq!(packet.header(1).unwrap().uint("tag").unwrap(), 7);
        assert_eq!(packet.to_string(), "Outer / Inner / Leaf");

        // 叶子头部没有净荷字段，不能再封装
        assert_eq!(
            packet.add("Inner").unwrap_err(),
            ProtocolError::NotEncapsulating("Leaf".to_string())
        );
    }

    #[test]
    fn test_serialize_with_trailer() {
        let mut packet = Packet::gen(registry(), "Outer").unwrap();
        packet.header_mut(0).unwrap().set_uint("crc", 0xCC).unwrap();
        packet.add("Inner").unwrap();
        packet.set_body(&[1, 2, 3]).unwrap();
        packet.calc().unwrap();

        // next len [tag body] crc
        assert_eq!(packet.to_bytes(), vec![1, 4, 0, 1, 2, 3, 0xCC]);
        assert_eq!(packet.size(), 7);
        assert_eq!(packet.body().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_outer_of_requires_attachment() {
        let registry = registry();
        let mut packet = Packet::gen(registry.clone(), "Outer").unwrap();
        packet.add("Inner").unwrap();

        let inner = packet.header(1).unwrap();
        assert_eq!(packet.outer_of(inner, &["Outer"]).unwrap().class_name(), "Outer");
        assert!(matches!(
            packet.outer_of(inner, &["Other"]),
            Err(ProtocolError::UnattachedHeader { .. })
        ));

        let detached = registry.class("Inner").unwrap().new_instance();
        assert!(matches!(
            packet.outer_of(&detached, &["Outer"]),
            Err(ProtocolError::UnattachedHeader { .. })
        ));

        // 副本里的头部不属于原报文
        let copy = packet.clone();
        assert_ne!(copy.id(), packet.id());
        assert!(packet.outer_of(copy.header(1).unwrap(), &["Outer"]).is_err());
        assert!(copy.outer_of(copy.header(1).unwrap(), &["Outer"]).is_ok());
    }

    #[test]
    fn test_insert_and_decapsulate() {
        let mut packet = Packet::gen(registry(), "Outer").unwrap();
        packet.add("Leaf").unwrap();
        packet.insert(0, "Inner").unwrap();
        assert_eq!(packet.to_string(), "Outer / Inner / Leaf");
        assert_eq!(packet.header(1).unwrap().uint("tag").unwrap(), 7);
        assert_eq!(packet.header(2).unwrap().attachment().unwrap().index, 2);

        let removed = packet.decapsulate(1).unwrap();
        assert!(removed.attachment().is_none());
        assert_eq!(packet.to_string(), "Outer / Leaf");
        assert_eq!(packet.header(1).unwrap().attachment().unwrap().index, 1);
    }

    #[test]
    fn test_decapsulate_innermost_returns_raw_body() {
        let mut packet = Packet::gen(registry(), "Outer").unwrap();
        packet.add("Inner").unwrap();
        packet.set_body(&[9, 9]).unwrap();
        packet.decapsulate(1).unwrap();
        assert_eq!(packet.body().as_ref(), &[9, 9]);
        assert_eq!(packet.to_bytes(), vec![1, 0, 9, 9, 0]);
    }

    #[test]
    fn test_replace_body_with_bytes_and_packet() {
        let registry = registry();
        let mut packet = Packet::gen(registry.clone(), "Outer").unwrap();
        packet.add("Inner").unwrap();
        packet.add("Leaf").unwrap();

        packet
            .replace_body_with(0, Replacement::Bytes(Bytes::from_static(&[5, 6])))
            .unwrap();
        assert_eq!(packet.len(), 1);
        assert_eq!(packet.body().as_ref(), &[5, 6]);

        let mut inner = Packet::gen(registry, "Inner").unwrap();
        inner.set_body(&[0xAB]).unwrap();
        packet.replace_body_with(0, Replacement::Packet(inner)).unwrap();
        assert_eq!(packet.to_string(), "Outer / Inner / Raw(1 bytes)");
        assert_eq!(packet.header(1).unwrap().attachment().unwrap().packet_id, packet.id());
    }

    #[test]
    fn test_find_and_queries() {
        let mut packet = Packet::gen(registry(), "Outer").unwrap();
        packet.add("Inner").unwrap();
        packet.add("Inner").unwrap();
        assert!(packet.is("Inner"));
        assert!(!packet.is("Leaf"));
        assert_eq!(packet.position("Inner"), Some(1));
        assert!(packet.find_nth("Inner", 1).is_some());
        assert!(packet.find_nth("Inner", 2).is_none());
        assert!(packet.find("Outer").is_some());
        assert!(packet.hexdump().starts_with("0000  01"));
    }
}
