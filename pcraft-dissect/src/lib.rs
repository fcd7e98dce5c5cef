//! pcraft 报文与解析驱动
//!
//! `Packet` 持有按线上顺序排列的头部；`Dissector` 把原始字节
//! 逐层解析成报文，构造方向则由 `Packet::add` 等操作完成

pub mod config;
pub mod dissector;
pub mod packet;

pub use config::DissectConfig;
pub use dissector::Dissector;
pub use packet::{Packet, PacketEnv, Replacement};
