//! Explicit unaligned little-endian loads/stores over mapped bytes.
//!
//! Feature headers and tag tables are packed on 1- and 4-byte boundaries
//! that do not satisfy the natural alignment of the integer types they
//! encode. Spec §4.3 and §9 both call out that a port must use explicit
//! unaligned reads rather than relying on reference punning (`&*(ptr as
//! *const u32)`), which is undefined behavior when the pointer isn't
//! aligned. These helpers read byte-by-byte and assemble the integer, which
//! is correct regardless of alignment and has no `unsafe` in it at all.

#[inline]
pub fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
pub fn read_i16_le(bytes: &[u8], offset: usize) -> i16 {
    read_u16_le(bytes, offset) as i16
}

#[inline]
pub fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[inline]
pub fn read_i32_le(bytes: &[u8], offset: usize) -> i32 {
    read_u32_le(bytes, offset) as i32
}

#[inline]
pub fn read_u64_le(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
pub fn read_i64_le(bytes: &[u8], offset: usize) -> i64 {
    read_u64_le(bytes, offset) as i64
}

#[inline]
pub fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_i32_le(buf: &mut [u8], offset: usize, value: i32) {
    write_u32_le(buf, offset, value as u32);
}

#[inline]
pub fn write_u64_le(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_correct_at_unaligned_offsets() {
        let mut buf = vec![0u8; 32];
        write_u32_le(&mut buf, 1, 0xdead_beef);
        assert_eq!(read_u32_le(&buf, 1), 0xdead_beef);

        write_u64_le(&mut buf, 3, 0x0102_0304_0506_0708);
        assert_eq!(read_u64_le(&buf, 3), 0x0102_0304_0506_0708);
    }
}
