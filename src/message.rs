//! 애플리케이션 계층 프레임 정의
//!
//! 전송 계층 위에 올라가는 프레임은 타입 바이트 없이 위치와 길이로 구분한다.
//!
//! | 프레임       | 순서 번호 없는 모드        | 순서 번호 모드                              |
//! |--------------|----------------------------|---------------------------------------------|
//! | 파일 이름    | `name + 0x00`              | `0xFFFFFFFE + name + 0x00`                  |
//! | 데이터       | 청크 바이트                | `seq(u32 BE) + 청크 바이트`                 |
//! | ACK          | 없음                       | `seq(u32 BE)`                               |
//! | 종료         | `crc(1 byte)`              | `0xFFFFFFFF + total(u32 BE) + crc(1 byte)`  |
//! | 검증 실패    | 없음                       | `0xFFFFFFFD + crc(1 byte)`                  |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// 순서 번호 길이 (바이트)
pub const SEQUENCE_LEN: usize = 4;

/// 종료 마커 크기 (순서 번호 없는 모드의 체크섬 패킷)
pub const CHECKSUM_LEN: usize = 1;

/// 파일 이름 종결자
pub const FILENAME_TERMINATOR: u8 = 0;

/// 종료 센티널 (순서 번호 모드)
pub const SENTINEL: u32 = 0xFFFF_FFFF;

/// 파일 이름 프레임 태그이자 파일 이름 ACK 값 (순서 번호 모드)
pub const FILENAME_TAG: u32 = 0xFFFF_FFFE;

/// 무결성 검증 실패 응답 태그 (순서 번호 모드)
pub const REJECT_TAG: u32 = 0xFFFF_FFFD;

/// 순서 번호 모드 종료 프레임 길이
pub const END_FRAME_LEN: usize = SEQUENCE_LEN + 4 + CHECKSUM_LEN;

/// 검증 실패 응답 길이
pub const REJECT_FRAME_LEN: usize = SEQUENCE_LEN + CHECKSUM_LEN;

/// 프레임 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// 4바이트 순서 번호 + ACK + 재전송
    Sequenced,
    /// 원시 청크, ACK 없음
    Unsequenced,
}

/// 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 파일 이름
    Filename(String),

    /// 데이터 청크 (순서 번호 없는 모드에서는 `sequence` 무시)
    Data { sequence: u32, payload: Bytes },

    /// 수신 확인
    Ack(u32),

    /// 종료 마커
    End { total_chunks: u32, checksum: u8 },

    /// 체크섬 불일치 응답, 수신측이 계산한 값
    Reject { checksum: u8 },
}

impl Frame {
    /// 바이트로 직렬화
    pub fn encode(&self, framing: Framing) -> Bytes {
        match (self, framing) {
            (Frame::Filename(name), Framing::Sequenced) => {
                let mut buf = BytesMut::with_capacity(SEQUENCE_LEN + name.len() + 1);
                buf.put_u32(FILENAME_TAG);
                buf.put_slice(name.as_bytes());
                buf.put_u8(FILENAME_TERMINATOR);
                buf.freeze()
            }
            (Frame::Filename(name), Framing::Unsequenced) => {
                let mut buf = BytesMut::with_capacity(name.len() + 1);
                buf.put_slice(name.as_bytes());
                buf.put_u8(FILENAME_TERMINATOR);
                buf.freeze()
            }
            (Frame::Data { sequence, payload }, Framing::Sequenced) => {
                let mut buf = BytesMut::with_capacity(SEQUENCE_LEN + payload.len());
                buf.put_u32(*sequence);
                buf.put_slice(payload);
                buf.freeze()
            }
            (Frame::Data { payload, .. }, Framing::Unsequenced) => payload.clone(),
            (Frame::Ack(sequence), _) => Bytes::copy_from_slice(&sequence.to_be_bytes()),
            (
                Frame::End {
                    total_chunks,
                    checksum,
                },
                Framing::Sequenced,
            ) => {
                let mut buf = BytesMut::with_capacity(END_FRAME_LEN);
                buf.put_u32(SENTINEL);
                buf.put_u32(*total_chunks);
                buf.put_u8(*checksum);
                buf.freeze()
            }
            (Frame::End { checksum, .. }, Framing::Unsequenced) => {
                Bytes::copy_from_slice(&[*checksum])
            }
            (Frame::Reject { checksum }, _) => {
                let mut buf = BytesMut::with_capacity(REJECT_FRAME_LEN);
                buf.put_u32(REJECT_TAG);
                buf.put_u8(*checksum);
                buf.freeze()
            }
        }
    }

    /// 송신측 → 수신측 프레임 역직렬화 (순서 번호 모드)
    pub fn decode_sequenced(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SEQUENCE_LEN {
            return Err(Error::MalformedFrame {
                len: bytes.len(),
                reason: "순서 번호보다 짧음",
            });
        }

        let mut buf = bytes;
        let tag = buf.get_u32();

        match tag {
            FILENAME_TAG => decode_filename(buf).map(Frame::Filename),
            SENTINEL => {
                if buf.len() != END_FRAME_LEN - SEQUENCE_LEN {
                    return Err(Error::MalformedFrame {
                        len: bytes.len(),
                        reason: "종료 프레임 길이 불일치",
                    });
                }
                let total_chunks = buf.get_u32();
                let checksum = buf.get_u8();
                Ok(Frame::End {
                    total_chunks,
                    checksum,
                })
            }
            sequence => Ok(Frame::Data {
                sequence,
                payload: Bytes::copy_from_slice(buf),
            }),
        }
    }

    /// 송신측 → 수신측 프레임 역직렬화 (순서 번호 없는 모드)
    ///
    /// 첫 패킷은 파일 이름, 이후 체크섬 크기의 패킷은 종료 마커다.
    pub fn decode_unsequenced(bytes: &[u8], awaiting_filename: bool) -> Result<Self> {
        if awaiting_filename {
            return decode_filename(bytes).map(Frame::Filename);
        }

        if bytes.len() == CHECKSUM_LEN {
            return Ok(Frame::End {
                total_chunks: 0,
                checksum: bytes[0],
            });
        }

        Ok(Frame::Data {
            sequence: 0,
            payload: Bytes::copy_from_slice(bytes),
        })
    }

    /// 수신측 → 송신측 응답 역직렬화 (ACK 또는 검증 실패)
    pub fn decode_reply(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [a, b, c, d, checksum]
                if u32::from_be_bytes([*a, *b, *c, *d]) == REJECT_TAG =>
            {
                Ok(Frame::Reject {
                    checksum: *checksum,
                })
            }
            _ => Self::decode_ack(bytes).map(Frame::Ack),
        }
    }

    /// 수신측 → 송신측 ACK 역직렬화
    pub fn decode_ack(bytes: &[u8]) -> Result<u32> {
        let raw: [u8; SEQUENCE_LEN] = bytes.try_into().map_err(|_| Error::MalformedFrame {
            len: bytes.len(),
            reason: "ACK 길이 불일치",
        })?;
        Ok(u32::from_be_bytes(raw))
    }
}

fn decode_filename(bytes: &[u8]) -> Result<String> {
    let name = match bytes.split_last() {
        Some((&FILENAME_TERMINATOR, name)) => name,
        _ => {
            return Err(Error::MalformedFrame {
                len: bytes.len(),
                reason: "파일 이름 종결자 없음",
            })
        }
    };

    String::from_utf8(name.to_vec())
        .map_err(|_| Error::InvalidFilename(String::from_utf8_lossy(name).into_owned()))
}
