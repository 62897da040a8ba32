//! 프로토콜 설정

use crate::flow::FlowConfig;
use crate::message::{Framing, CHECKSUM_LEN};
use crate::{Error, Result, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, PROTOCOL_ID};

/// PFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 프레임 방식
    pub framing: Framing,

    /// 루프 고정 시간 간격 (초)
    pub delta_time: f64,

    /// 링크 통계 출력 주기 (초)
    pub stats_interval: f64,

    /// 전송 계층 프로토콜 식별자
    pub protocol_id: u32,

    /// 수신 없이 연결을 유지하는 최대 시간 (초)
    pub connection_timeout: f64,

    /// 동시에 전송 중일 수 있는 최대 프레임 수 (순서 번호 모드)
    pub send_window: usize,

    /// ACK 진전이 없을 때 재전송까지 대기 시간 (초)
    pub retransmit_timeout: f64,

    /// 연속 재전송 타임아웃 허용 횟수
    pub max_retransmits: u32,

    /// 수신 완료 후 중복 종료 프레임에 응답하며 대기하는 시간 (초)
    pub linger_time: f64,

    /// 세션 한 번 종료 후 루프 종료 여부
    pub exit_after_transfer: bool,

    /// 흐름 제어 파라미터
    pub flow: FlowConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            framing: Framing::Sequenced,
            delta_time: 1.0 / 30.0,
            stats_interval: 0.25,
            protocol_id: PROTOCOL_ID,
            connection_timeout: 10.0,
            send_window: 32,
            retransmit_timeout: 1.0,
            max_retransmits: 10,
            linger_time: 2.0,
            exit_after_transfer: false,
            flow: FlowConfig::default(),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 순서 번호 없는 원시 청크 모드 (ACK, 재전송 없음)
    pub fn unsequenced() -> Self {
        Self {
            framing: Framing::Unsequenced,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            chunk_size: 128,                  // 작은 청크
            send_window: 8,
            retransmit_timeout: 2.0,
            max_retransmits: 30,
            connection_timeout: 20.0,
            linger_time: 5.0,
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "chunk_size {} 는 1 ~ {MAX_CHUNK_SIZE} 범위여야 함",
                self.chunk_size
            )));
        }
        if self.framing == Framing::Unsequenced && self.chunk_size < CHECKSUM_LEN + 2 {
            return Err(Error::InvalidConfig(format!(
                "순서 번호 없는 모드는 chunk_size {} 이상 필요",
                CHECKSUM_LEN + 2
            )));
        }
        if !(self.delta_time > 0.0) {
            return Err(Error::InvalidConfig("delta_time 은 양수여야 함".into()));
        }
        if !(self.stats_interval > 0.0) {
            return Err(Error::InvalidConfig("stats_interval 은 양수여야 함".into()));
        }
        if self.send_window == 0 {
            return Err(Error::InvalidConfig("send_window 는 1 이상이어야 함".into()));
        }
        if !(self.retransmit_timeout > 0.0) {
            return Err(Error::InvalidConfig("retransmit_timeout 은 양수여야 함".into()));
        }
        if self.flow.min_penalty > self.flow.max_penalty {
            return Err(Error::InvalidConfig("min_penalty > max_penalty".into()));
        }
        Ok(())
    }
}
