//! 16位反码校验和（RFC 1071）

/// 按16位大端字累加，奇数长度末尾补零
///
/// 64位累加器在 2^48 个字以内不会溢出
pub fn ones_complement_sum(data: &[u8]) -> u64 {
    let mut sum = 0u64;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u64;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u64) << 8;
    }
    sum
}

/// 把进位折回低16位
pub fn fold(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// 互联网校验和
pub fn internet_checksum(data: &[u8]) -> u16 {
    !fold(ones_complement_sum(data))
}

/// 对多段数据（如伪首部+首部+净荷）按拼接后的内容计算校验和
pub fn internet_checksum_parts(parts: &[&[u8]]) -> u16 {
    let data: Vec<u8> = parts.concat();
    internet_checksum(&data)
}
