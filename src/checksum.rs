//! 무결성 체크섬
//!
//! - CRC-8 (다항식 0x07, MSB-first, 초기값 0, 최종 XOR 없음): 전송 성공/실패 판정
//! - 바이트 합 체크섬: 파일 메타데이터 표시용 (검증에는 사용하지 않음)

/// CRC-8 생성 다항식
pub const CRC8_POLYNOMIAL: u8 = 0x07;

/// 바이트별 CRC-8 테이블 (컴파일 타임 생성)
static CRC8_TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut remainder = i as u8;
        let mut bit = 0;
        while bit < 8 {
            remainder = if remainder & 0x80 != 0 {
                (remainder << 1) ^ CRC8_POLYNOMIAL
            } else {
                remainder << 1
            };
            bit += 1;
        }
        table[i] = remainder;
        i += 1;
    }
    table
}

/// 버퍼 전체에 대한 CRC-8 계산
pub fn crc8(buffer: &[u8]) -> u8 {
    let mut crc = Crc8::new();
    crc.update(buffer);
    crc.value()
}

/// 누적형 CRC-8
///
/// 초기값과 최종 XOR이 없으므로 청크를 순서대로 `update` 하면
/// 전체 버퍼에 대해 [`crc8`]을 계산한 값과 정확히 같다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc8 {
    remainder: u8,
}

impl Crc8 {
    pub fn new() -> Self {
        Self::default()
    }

    /// 바이트 누적
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.remainder = CRC8_TABLE[(self.remainder ^ byte) as usize];
        }
    }

    /// 현재 체크섬 값
    pub fn value(&self) -> u8 {
        self.remainder
    }
}

/// 바이트 합 체크섬 (표시용)
pub fn additive_checksum(buffer: &[u8]) -> u32 {
    buffer
        .iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32))
}

/// 전송 전 출력하는 파일 요약
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSummary {
    /// 파일 크기 (바이트)
    pub size: u64,

    /// CRC-8
    pub crc: u8,

    /// 바이트 합
    pub byte_sum: u32,
}

impl FileSummary {
    pub fn of(content: &[u8]) -> Self {
        Self {
            size: content.len() as u64,
            crc: crc8(content),
            byte_sum: additive_checksum(content),
        }
    }
}

impl std::fmt::Display for FileSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} bytes, CRC 0x{:02X}, sum 0x{:08X}",
            self.size, self.crc, self.byte_sum
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 테이블 없이 비트 단위로 계산하는 기준 구현
    fn crc8_bitwise(buffer: &[u8]) -> u8 {
        let mut remainder = 0u8;
        for &byte in buffer {
            remainder ^= byte;
            for _ in 0..8 {
                remainder = if remainder & 0x80 != 0 {
                    (remainder << 1) ^ CRC8_POLYNOMIAL
                } else {
                    remainder << 1
                };
            }
        }
        remainder
    }

    #[test]
    fn test_check_value() {
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc8(&[]), 0x00);
        assert_eq!(crc8(&[0x01]), 0x07);
    }

    #[test]
    fn test_table_matches_bitwise() {
        for byte in 0..=255u8 {
            assert_eq!(crc8(&[byte]), crc8_bitwise(&[byte]));
        }

        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 + 7) as u8).collect();
        assert_eq!(crc8(&data), crc8_bitwise(&data));
    }

    #[test]
    fn test_deterministic() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(crc8(&data), crc8(&data.clone()));
    }

    #[test]
    fn test_incremental_equals_whole_buffer() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7) as u8).collect();

        let mut crc = Crc8::new();
        for chunk in data.chunks(256) {
            crc.update(chunk);
        }

        assert_eq!(crc.value(), crc8(&data));
    }

    #[test]
    fn test_additive_checksum() {
        assert_eq!(additive_checksum(&[1, 2, 3]), 6);
        assert_eq!(additive_checksum(&[0xFF; 4]), 0x3FC);
    }

    #[test]
    fn test_file_summary_display() {
        let summary = FileSummary::of(b"123456789");
        assert_eq!(summary.size, 9);
        assert_eq!(summary.crc, 0xF4);
        assert_eq!(summary.to_string(), "9 bytes, CRC 0xF4, sum 0x000001DD");
    }
}
