//! 테이블 기반 32비트 체크섬
//!
//! MSB-first 테이블에 4바이트 그룹을 역순(byte 3, 2, 1, 0)으로 넣는 변형이다.
//! 노드 측 하드웨어 CRC 가 32비트 워드 단위로 입력받는 방식과 맞추기 위한 것으로,
//! 일반적인 CRC-32 구현으로 대체하면 값이 달라진다.

const MASK: u32 = 0xFFFF_FFFF;
const GROUP: usize = 4;

/// 체크섬 엔진 (생성 후 불변)
#[derive(Clone)]
pub struct ChecksumEngine {
    polynomial: u32,
    table: [u32; 256],
}

impl ChecksumEngine {
    /// 다항식으로 엔진 생성
    pub fn new(polynomial: u32) -> Self {
        Self {
            polynomial,
            table: Self::build_table(polynomial),
        }
    }

    /// 256 엔트리 룩업 테이블 생성
    pub fn build_table(polynomial: u32) -> [u32; 256] {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut c = (i as u32) << 24;
            for _ in 0..8 {
                c = if c & 0x8000_0000 != 0 {
                    (c << 1) ^ polynomial
                } else {
                    c << 1
                };
            }
            *entry = c;
        }
        table
    }

    /// 설정된 다항식
    pub fn polynomial(&self) -> u32 {
        self.polynomial
    }

    /// 체크섬 계산
    pub fn checksum(&self, data: &[u8]) -> u32 {
        let mut acc = MASK;

        let mut groups = data.chunks_exact(GROUP);
        for group in &mut groups {
            acc = self.fold_group(acc, group);
        }

        let rest = groups.remainder();
        if !rest.is_empty() {
            let mut padded = [0u8; GROUP];
            padded[..rest.len()].copy_from_slice(rest);
            acc = self.fold_group(acc, &padded);
        }

        acc ^ MASK
    }

    #[inline]
    fn fold_group(&self, mut acc: u32, group: &[u8]) -> u32 {
        for &byte in group.iter().rev() {
            let index = ((acc >> 24) ^ byte as u32) & 0xFF;
            acc = ((acc << 8) & MASK) ^ self.table[index as usize];
        }
        acc
    }
}

impl std::fmt::Debug for ChecksumEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumEngine")
            .field("polynomial", &format_args!("{:#010X}", self.polynomial))
            .finish()
    }
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        Self::new(crate::DEFAULT_POLYNOMIAL)
    }
}
