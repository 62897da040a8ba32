//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

/// PFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("전송 계층 초기화 실패 ({addr}): {source}")]
    TransportInit {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("연결 실패: {addr}")]
    ConnectFailed { addr: String },

    #[error("연결 끊김")]
    ConnectionLost,

    #[error("재전송 한도 초과: {retries}회 연속 타임아웃")]
    RetransmitLimit { retries: u32 },

    #[error("파일 IO 에러 ({}): {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("체크섬 불일치: expected {expected:02X}, computed {computed:02X}")]
    Integrity { expected: u8, computed: u8 },

    #[error("유효하지 않은 파일 이름: {0:?}")]
    InvalidFilename(String),

    #[error("잘못된 프레임 ({len} bytes): {reason}")]
    MalformedFrame { len: usize, reason: &'static str },

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 파일 IO 에러 생성 헬퍼
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// 프로토콜 위반 여부 (파일 이름, 프레임 형식)
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::InvalidFilename(_) | Self::MalformedFrame { .. })
    }

    /// 연결 관련 에러 여부
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::ConnectionLost | Self::RetransmitLimit { .. }
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::InvalidFilename("a/b".into()).is_protocol());
        assert!(Error::MalformedFrame { len: 2, reason: "short" }.is_protocol());
        assert!(Error::ConnectionLost.is_connection());
        assert!(Error::RetransmitLimit { retries: 3 }.is_connection());
        assert!(!Error::Integrity { expected: 1, computed: 2 }.is_connection());
    }

    #[test]
    fn test_integrity_message() {
        let err = Error::Integrity {
            expected: 0xF4,
            computed: 0x0A,
        };
        assert_eq!(err.to_string(), "체크섬 불일치: expected F4, computed 0A");
    }
}
