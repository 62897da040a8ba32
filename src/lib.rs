//! # PFT (Paced File Transfer)
//!
//! UDP 가상 연결 위에서 한 번에 파일 하나를 보내는 전송 도구
//!
//! ## 핵심 특징
//! - **흐름 제어**: RTT 기반 Good/Bad 두 단계 송신 속도, penalty 히스테리시스
//! - **무결성 검증**: 파일 전체 CRC-8을 종료 마커로 전달, 수신측이 누적 계산해 비교
//! - **두 가지 프레임 방식**: 순서 번호 + 누적 ACK + go-back-N 재전송, 또는 원시 청크
//! - **단일 스레드 루프**: 고정 시간 간격 `tick`, 블로킹 없는 송수신
//! - **주입 가능한 전송 계층**: UDP 구현과 테스트용 루프백 구현

pub mod checksum;
pub mod chunk;
pub mod config;
pub mod error;
pub mod flow;
pub mod loopback;
pub mod message;
pub mod receiver;
pub mod reliability;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transfer_loop;
pub mod transport;

pub use checksum::{crc8, Crc8, FileSummary};
pub use chunk::{Chunk, ChunkBuilder};
pub use config::Config;
pub use error::{Error, Result};
pub use flow::{FlowConfig, FlowMode, FlowState, RateController};
pub use loopback::{LinkConditions, LoopbackTransport};
pub use message::{Frame, Framing};
pub use receiver::{Feed, FileReceiver};
pub use sender::FileSender;
pub use session::{SessionState, TransferReport, TransferSession};
pub use stats::{LinkStats, TransferStats};
pub use transfer_loop::{Endpoint, TransferLoop};
pub use transport::{Transport, UdpTransport};

/// 전송 계층 프로토콜 식별자
pub const PROTOCOL_ID: u32 = 0x1122_3344;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// 전송 계층 페이로드 최대 크기 (바이트)
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// 순서 번호를 붙여도 페이로드에 들어가는 최대 청크 크기
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE - message::SEQUENCE_LEN;

/// 서버 기본 포트
pub const SERVER_PORT: u16 = 30000;

/// 클라이언트 기본 포트
pub const CLIENT_PORT: u16 = 30001;
