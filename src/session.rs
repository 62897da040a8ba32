//! 전송 세션 상태
//!
//! 한 파일의 한 방향(송신 또는 수신) 전송 상태를 추적한다.
//! - 파일 이름 검증
//! - 순서 번호 수락/거부 정책
//! - 누적 CRC-8

use std::path::Path;
use std::time::Duration;

use crate::checksum::Crc8;
use crate::{Error, Result};

/// 파일 이름 최대 길이 (바이트, 종결자 제외)
pub const MAX_FILENAME_LEN: usize = 255;

/// 파일 이름에 허용되지 않는 문자
pub const FORBIDDEN_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// 세션 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 생성됨, 아직 패킷 없음
    Idle,
    /// 청크 송수신 중
    Transferring,
    /// 종료 마커 송신/대기 중
    Verifying,
    /// 체크섬 일치로 완료
    Complete,
    /// 체크섬 불일치, IO 에러, 재전송 한도 초과
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }
}

/// 순서 번호 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// 기대한 순서 번호, 반영됨
    Accepted,
    /// 이미 받은 순서 번호
    Duplicate,
    /// 앞선 청크 누락, 버려짐
    OutOfOrder,
}

/// 파일 이름 검증
///
/// 빈 이름, `.`/`..`, 제어 문자, 경로 구분자 및 메타 문자를 거부한다.
pub fn validate_filename(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.len() > MAX_FILENAME_LEN
        || name == "."
        || name == ".."
        || name.chars().any(|c| c.is_control())
        || name.contains(FORBIDDEN_FILENAME_CHARS);

    if invalid {
        return Err(Error::InvalidFilename(name.to_string()));
    }
    Ok(())
}

/// 원본 경로에서 전송용 파일 이름 추출
pub fn filename_from_path(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidFilename(path.display().to_string()))?;

    validate_filename(name)?;
    Ok(name.to_string())
}

/// 전송 세션
#[derive(Debug, Clone)]
pub struct TransferSession {
    role: Role,
    filename: String,
    expected_sequence: u32,
    checksum: Crc8,
    state: SessionState,
    bytes: u64,
}

impl TransferSession {
    /// 새 세션 생성 (파일 이름 검증 포함)
    pub fn new(role: Role, filename: impl Into<String>) -> Result<Self> {
        let filename = filename.into();
        validate_filename(&filename)?;

        Ok(Self {
            role,
            filename,
            expected_sequence: 0,
            checksum: Crc8::new(),
            state: SessionState::Idle,
            bytes: 0,
        })
    }

    /// 순서 번호가 붙은 청크 판정 및 반영
    pub fn accept(&mut self, sequence: u32, payload: &[u8]) -> Acceptance {
        if sequence == self.expected_sequence {
            self.append(payload);
            self.expected_sequence += 1;
            Acceptance::Accepted
        } else if sequence < self.expected_sequence {
            Acceptance::Duplicate
        } else {
            Acceptance::OutOfOrder
        }
    }

    /// 순서 번호 없는 청크 반영
    pub fn append(&mut self, payload: &[u8]) {
        self.checksum.update(payload);
        self.bytes += payload.len() as u64;
        if self.state == SessionState::Idle {
            self.state = SessionState::Transferring;
        }
    }

    /// 누적 체크섬과 수신한 값 비교
    pub fn verify(&mut self, expected: u8) -> Result<()> {
        self.state = SessionState::Verifying;
        let computed = self.checksum.value();

        if computed == expected {
            self.state = SessionState::Complete;
            Ok(())
        } else {
            self.state = SessionState::Failed;
            Err(Error::Integrity { expected, computed })
        }
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn fail(&mut self) {
        self.state = SessionState::Failed;
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn expected_sequence(&self) -> u32 {
        self.expected_sequence
    }

    /// 마지막으로 수락한 순서 번호
    pub fn last_accepted(&self) -> Option<u32> {
        self.expected_sequence.checked_sub(1)
    }

    pub fn checksum(&self) -> u8 {
        self.checksum.value()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// 세션 종료 보고
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub role: Role,
    pub filename: String,
    pub bytes: u64,
    pub checksum: u8,
    pub state: SessionState,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }

    /// 처리율 (Mbps, 1 Mb = 1024 * 1024 bits)
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.bytes as f64 * 8.0) / (1024.0 * 1024.0) / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::crc8;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("report.bin").is_ok());
        assert!(validate_filename("데이터 파일.txt").is_ok());

        for name in ["", ".", "..", "a/b", "a\\b", "c:", "*.bin", "what?", "\"q\"", "<x>", "a|b", "nul\0"] {
            assert!(
                matches!(validate_filename(name), Err(Error::InvalidFilename(_))),
                "{name:?} should be rejected"
            );
        }

        assert!(validate_filename(&"a".repeat(MAX_FILENAME_LEN)).is_ok());
        assert!(validate_filename(&"a".repeat(MAX_FILENAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_filename_from_path() {
        let name = filename_from_path(Path::new("/tmp/out/report.bin")).unwrap();
        assert_eq!(name, "report.bin");
        assert!(filename_from_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_sequence_acceptance() {
        let mut session = TransferSession::new(Role::Receiver, "a.bin").unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.last_accepted(), None);

        assert_eq!(session.accept(0, b"abc"), Acceptance::Accepted);
        assert_eq!(session.expected_sequence(), 1);
        assert_eq!(session.state(), SessionState::Transferring);

        assert_eq!(session.accept(2, b"zzz"), Acceptance::OutOfOrder);
        assert_eq!(session.expected_sequence(), 1);

        assert_eq!(session.accept(0, b"abc"), Acceptance::Duplicate);
        assert_eq!(session.expected_sequence(), 1);

        assert_eq!(session.accept(1, b"def"), Acceptance::Accepted);
        assert_eq!(session.last_accepted(), Some(1));
        assert_eq!(session.bytes(), 6);
        assert_eq!(session.checksum(), crc8(b"abcdef"));
    }

    #[test]
    fn test_verify() {
        let mut session = TransferSession::new(Role::Receiver, "a.bin").unwrap();
        session.append(b"123456789");
        assert!(session.verify(0xF4).is_ok());
        assert_eq!(session.state(), SessionState::Complete);

        let mut session = TransferSession::new(Role::Receiver, "a.bin").unwrap();
        session.append(b"123456789");
        let err = session.verify(0x00).unwrap_err();
        assert!(matches!(err, Error::Integrity { expected: 0x00, computed: 0xF4 }));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_report_throughput() {
        let report = TransferReport {
            role: Role::Sender,
            filename: "a.bin".into(),
            bytes: 1024 * 1024,
            checksum: 0,
            state: SessionState::Complete,
            elapsed: Duration::from_secs(2),
            error: None,
        };
        assert!((report.throughput_mbps() - 4.0).abs() < 1e-9);
        assert!(report.is_complete());
    }
}
