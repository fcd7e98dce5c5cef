//! 结构引擎
//!
//! 按字段声明顺序在字节缓冲区上顺序读写；可选字段谓词为假时跳过

use std::sync::Arc;

use crate::env::{DetachedEnv, HeaderEnv};
use crate::error::ProtocolError;
use crate::field::codec::{read_value, value_size, write_value, BodyWriter};
use crate::header::Header;
use crate::schema::HeaderClass;

impl HeaderClass {
    /// 创建实例，按声明顺序求默认值
    ///
    /// 默认值生成器看到的是部分填充的实例，只能引用前面的字段
    pub fn new_instance(self: &Arc<Self>) -> Header {
        let mut header = Header::empty(self);
        for schema in self.fields() {
            let value = schema.default_for(&header);
            header.values.push(value);
        }
        header
    }

    /// 从缓冲区反序列化一个实例
    ///
    /// # 返回
    /// - `Ok((header, consumed))`: 实例与消耗的字节数
    /// - `Err(ProtocolError::TruncatedInput)`: 数据不足
    pub fn deserialize(self: &Arc<Self>, buf: &[u8]) -> Result<(Header, usize), ProtocolError> {
        let mut header = self.new_instance();
        let consumed = header.read(buf)?;
        Ok((header, consumed))
    }

    /// 调用 `parse?` 钩子，未声明时接受
    pub fn parse_ok(&self, header: &Header) -> bool {
        self.hooks().validate.as_ref().map_or(true, |f| f(header))
    }
}

impl Header {
    /// 用缓冲区内容覆盖当前出现的字段，返回消耗的字节数
    ///
    /// 失败时实例保持不变
    pub fn read(&mut self, buf: &[u8]) -> Result<usize, ProtocolError> {
        let class = self.class.clone();
        let mut work = self.clone();
        let mut offset = 0usize;

        for (index, schema) in class.fields().iter().enumerate() {
            if !schema.is_present(&work) {
                continue;
            }
            let (value, used) = read_value(schema.kind(), schema.name(), &buf[offset..], &work)?;
            work.values[index] = value;
            offset += used;
        }

        *self = work;
        Ok(offset)
    }

    /// 写出所有出现的字段，被封装的净荷由 `body` 提供
    pub fn write_into(&self, out: &mut Vec<u8>, body: BodyWriter<'_>) {
        for (schema, value) in self.class.fields().iter().zip(&self.values) {
            if schema.is_present(self) {
                write_value(schema.kind(), value, out, body);
            }
        }
    }

    /// 序列化（被封装的净荷视为空）
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.write_into(&mut out, &mut |_: &mut Vec<u8>| {});
        out
    }

    /// 序列化但不包含净荷槽位
    pub fn to_bytes_without_body(&self) -> Vec<u8> {
        let body_index = self.class.body_index();
        let mut out = Vec::new();
        for (index, (schema, value)) in self.class.fields().iter().zip(&self.values).enumerate() {
            if Some(index) != body_index && schema.is_present(self) {
                write_value(schema.kind(), value, &mut out, &mut |_: &mut Vec<u8>| {});
            }
        }
        out
    }

    /// 序列化后的长度（被封装的净荷视为空）
    pub fn size(&self) -> usize {
        self.size_with(0)
    }

    /// 序列化后的长度，被封装的净荷按 `body_size` 计
    pub fn size_with(&self, body_size: usize) -> usize {
        self.class
            .fields()
            .iter()
            .zip(&self.values)
            .filter(|(schema, _)| schema.is_present(self))
            .map(|(schema, value)| value_size(schema.kind(), value, body_size))
            .sum()
    }

    /// 净荷之前的首部长度；没有净荷字段时为整个头部长度
    pub fn header_len(&self) -> usize {
        let end = self.class.body_index().unwrap_or(self.values.len());
        self.class
            .fields()
            .iter()
            .zip(&self.values)
            .take(end)
            .filter(|(schema, _)| schema.is_present(self))
            .map(|(schema, value)| value_size(schema.kind(), value, 0))
            .sum()
    }

    /// 未挂接时计算派生字段，需要外层头部的计算会返回 `UnattachedHeader`
    pub fn calc(&mut self) -> Result<(), ProtocolError> {
        self.calc_with(&DetachedEnv)
    }

    /// 先长度后校验和
    pub fn calc_with(&mut self, env: &dyn HeaderEnv) -> Result<(), ProtocolError> {
        self.calc_length_with(env)?;
        self.calc_checksum_with(env)
    }

    pub fn calc_length_with(&mut self, env: &dyn HeaderEnv) -> Result<(), ProtocolError> {
        match self.class.hooks().calc_length.clone() {
            Some(f) => f(self, env),
            None => Ok(()),
        }
    }

    pub fn calc_checksum_with(&mut self, env: &dyn HeaderEnv) -> Result<(), ProtocolError> {
        match self.class.hooks().calc_checksum.clone() {
            Some(f) => f(self, env),
            None => Ok(()),
        }
    }

    /// 交换源/目的（应答），未声明钩子时不变
    pub fn invert(&mut self) -> Result<(), ProtocolError> {
        match self.class.hooks().invert.clone() {
            Some(f) => f(self),
            None => Ok(()),
        }
    }
}
