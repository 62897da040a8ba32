//! 청크 분할
//!
//! - Chunk: 순서 번호가 붙은 전송 단위 (기본 256 bytes 이하)
//! - 파일 내용은 `Bytes`로 한 번 읽어 두고 청크는 그 슬라이스를 공유한다

use std::ops::Range;

use bytes::{Bytes, BytesMut};

use crate::message::{Framing, CHECKSUM_LEN, FILENAME_TAG};
use crate::{Error, Result, MAX_CHUNK_SIZE};

/// 청크 (송신 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 순서 번호 (0부터 1씩 증가)
    pub sequence: u32,

    /// 실제 데이터
    pub data: Bytes,
}

/// `len` 바이트를 `chunk_size` 단위 구간으로 분할
pub fn chunk_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    (0..len)
        .step_by(chunk_size.max(1))
        .map(|start| start..(start + chunk_size).min(len))
        .collect()
}

/// 수신 순서대로 청크 재조립
pub fn reassemble<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Bytes {
    let mut buf = BytesMut::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk);
    }
    buf.freeze()
}

/// 청크 생성기 (송신측)
#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    chunk_size: usize,
    framing: Framing,
}

impl ChunkBuilder {
    pub fn new(chunk_size: usize, framing: Framing) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "chunk_size {chunk_size}: 1 ~ {MAX_CHUNK_SIZE} 범위여야 함"
            )));
        }

        // 순서 번호 없는 모드에서는 체크섬 크기의 청크를 피하기 위해 경계를 옮길 여유가 필요
        if framing == Framing::Unsequenced && chunk_size < CHECKSUM_LEN + 2 {
            return Err(Error::InvalidConfig(format!(
                "chunk_size {chunk_size}: 순서 번호 없는 모드는 {} 이상 필요",
                CHECKSUM_LEN + 2
            )));
        }

        Ok(Self {
            chunk_size,
            framing,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 데이터를 청크들로 분할
    pub fn split(&self, content: &Bytes) -> Result<Vec<Chunk>> {
        let mut ranges = chunk_ranges(content.len(), self.chunk_size);

        if ranges.len() >= FILENAME_TAG as usize {
            return Err(Error::InvalidConfig(format!(
                "청크 수 {} 가 순서 번호 범위를 초과",
                ranges.len()
            )));
        }

        if self.framing == Framing::Unsequenced {
            avoid_marker_sized_tail(&mut ranges)?;
        }

        Ok(ranges
            .into_iter()
            .enumerate()
            .map(|(idx, range)| Chunk {
                sequence: idx as u32,
                data: content.slice(range),
            })
            .collect())
    }
}

/// 마지막 청크가 종료 마커와 같은 크기면 직전 청크에서 한 바이트를 넘긴다
fn avoid_marker_sized_tail(ranges: &mut [Range<usize>]) -> Result<()> {
    match ranges {
        [.., prev, last] if last.len() == CHECKSUM_LEN => {
            prev.end -= 1;
            last.start -= 1;
            Ok(())
        }
        [only] if only.len() == CHECKSUM_LEN => Err(Error::InvalidConfig(
            "체크섬 크기의 파일은 순서 번호 없는 모드로 보낼 수 없음".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_split_and_reassemble() {
        let builder = ChunkBuilder::new(256, Framing::Sequenced).unwrap();
        let data = pattern(10_000);
        let chunks = builder.split(&data).unwrap();

        assert_eq!(chunks.len(), 40);
        assert!(chunks.iter().all(|c| c.data.len() <= 256));
        assert_eq!(chunks.last().unwrap().data.len(), 10_000 - 39 * 256);
        assert!(chunks.iter().enumerate().all(|(i, c)| c.sequence == i as u32));

        let restored = reassemble(chunks.iter().map(|c| c.data.as_ref()));
        assert_eq!(restored, data);
    }

    #[test]
    fn test_empty_content() {
        let builder = ChunkBuilder::new(256, Framing::Sequenced).unwrap();
        assert!(builder.split(&Bytes::new()).unwrap().is_empty());
        assert!(chunk_ranges(0, 16).is_empty());
    }

    #[test]
    fn test_unsequenced_tail_rebalanced() {
        let builder = ChunkBuilder::new(256, Framing::Unsequenced).unwrap();
        let data = pattern(513);
        let chunks = builder.split(&data).unwrap();

        let sizes: Vec<usize> = chunks.iter().map(|c| c.data.len()).collect();
        assert_eq!(sizes, vec![256, 255, 2]);
        assert_eq!(reassemble(chunks.iter().map(|c| c.data.as_ref())), data);
    }

    #[test]
    fn test_unsequenced_single_byte_rejected() {
        let builder = ChunkBuilder::new(256, Framing::Unsequenced).unwrap();
        assert!(builder.split(&pattern(1)).is_err());

        let sequenced = ChunkBuilder::new(256, Framing::Sequenced).unwrap();
        assert_eq!(sequenced.split(&pattern(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(ChunkBuilder::new(0, Framing::Sequenced).is_err());
        assert!(ChunkBuilder::new(MAX_CHUNK_SIZE + 1, Framing::Sequenced).is_err());
        assert!(ChunkBuilder::new(2, Framing::Unsequenced).is_err());
        assert!(ChunkBuilder::new(1, Framing::Sequenced).is_ok());
    }
}
