//! 메모리 내 전송 계층
//!
//! 두 엔드포인트가 큐를 공유하는 가상 링크. 지연, 손실, 중복, 순서 뒤바뀜을
//! 시드 고정 난수로 재현할 수 있어 전송 루프 테스트에 쓴다.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::reliability::ReliabilitySystem;
use crate::stats::LinkStats;
use crate::transport::{ConnectionState, Transport, RTT_MAXIMUM};
use crate::{Error, Result, MAX_PAYLOAD_SIZE};

/// 링크 품질 설정
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConditions {
    /// 단방향 지연 (초)
    pub latency: f64,

    /// 손실 확률 (0.0 ~ 1.0)
    pub loss_rate: f64,

    /// 중복 확률
    pub duplicate_rate: f64,

    /// 순서 뒤바뀜 확률
    pub reorder_rate: f64,

    /// 난수 시드
    pub seed: u64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            latency: 0.0,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

impl LinkConditions {
    /// 손실/중복/순서 뒤바뀜이 섞인 불안정 링크
    pub fn lossy(seed: u64) -> Self {
        Self {
            latency: 0.02,
            loss_rate: 0.1,
            duplicate_rate: 0.05,
            reorder_rate: 0.05,
            seed,
        }
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    sequence: u32,
    ack: u32,
    ack_bits: u32,
    payload: Bytes,
    /// 도착까지 남은 시간 (초)
    delay: f64,
}

#[derive(Debug, Default)]
struct Link {
    inboxes: [VecDeque<InFlight>; 2],
    severed: bool,
}

/// 링크 절단 핸들
#[derive(Debug, Clone)]
pub struct LinkHandle {
    link: Arc<Mutex<Link>>,
}

impl LinkHandle {
    /// 링크 절단 (이후 모든 패킷 폐기)
    pub fn sever(&self) {
        let mut link = self.link.lock();
        link.severed = true;
        link.inboxes.iter_mut().for_each(VecDeque::clear);
    }

    pub fn is_severed(&self) -> bool {
        self.link.lock().severed
    }
}

/// 루프백 엔드포인트
pub struct LoopbackTransport {
    side: usize,
    link: Arc<Mutex<Link>>,
    conditions: LinkConditions,
    rng: StdRng,
    timeout: f64,
    timeout_accumulator: f64,
    state: ConnectionState,
    listening: bool,
    reliability: ReliabilitySystem,
}

impl LoopbackTransport {
    /// 연결된 엔드포인트 쌍 생성
    pub fn pair(conditions: LinkConditions, timeout: f64) -> (Self, Self) {
        let link = Arc::new(Mutex::new(Link::default()));
        let endpoint = |side: usize| Self {
            side,
            link: Arc::clone(&link),
            conditions,
            rng: StdRng::seed_from_u64(conditions.seed.wrapping_add(side as u64)),
            timeout,
            timeout_accumulator: 0.0,
            state: ConnectionState::Disconnected,
            listening: false,
            reliability: ReliabilitySystem::new(RTT_MAXIMUM),
        };
        (endpoint(0), endpoint(1))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 링크 절단
    pub fn sever(&self) {
        self.handle().sever();
    }

    /// 루프에 넘긴 뒤에도 링크를 제어할 핸들
    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            link: Arc::clone(&self.link),
        }
    }

    fn clear_data(&mut self) {
        self.timeout_accumulator = 0.0;
        self.reliability.reset();
        self.link.lock().inboxes[self.side].clear();
    }

    fn can_send(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    fn accept(&mut self, packet: &InFlight) {
        match self.state {
            ConnectionState::Listening => {
                debug!("loopback side {} accepts connection", self.side);
                self.state = ConnectionState::Connected;
            }
            ConnectionState::Connecting => {
                debug!("loopback side {} connected", self.side);
                self.state = ConnectionState::Connected;
            }
            _ => {}
        }

        self.timeout_accumulator = 0.0;
        self.reliability
            .packet_received(packet.sequence, packet.payload.len());
        self.reliability.process_ack(packet.ack, packet.ack_bits);
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, address: SocketAddr) {
        self.clear_data();
        self.listening = false;
        debug!("loopback side {} connecting to {}", self.side, address);
        self.state = ConnectionState::Connecting;
    }

    fn listen(&mut self) {
        self.clear_data();
        self.listening = true;
        self.state = ConnectionState::Listening;
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn connect_failed(&self) -> bool {
        self.state == ConnectionState::ConnectFail
    }

    fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        if !self.can_send() {
            return Ok(());
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::MalformedFrame {
                len: payload.len(),
                reason: "최대 페이로드 초과",
            });
        }

        let packet = InFlight {
            sequence: self.reliability.local_sequence(),
            ack: self.reliability.remote_sequence(),
            ack_bits: self.reliability.generate_ack_bits(),
            payload: Bytes::copy_from_slice(payload),
            delay: self.conditions.latency,
        };
        self.reliability.packet_sent(payload.len());

        let lost = self.rng.gen_bool(self.conditions.loss_rate);
        let duplicated = self.rng.gen_bool(self.conditions.duplicate_rate);
        let reordered = self.rng.gen_bool(self.conditions.reorder_rate);

        let mut link = self.link.lock();
        if link.severed || lost {
            return Ok(());
        }

        let inbox = &mut link.inboxes[1 - self.side];
        if duplicated {
            inbox.push_back(packet.clone());
        }
        if reordered && !inbox.is_empty() {
            let position = inbox.len() - 1;
            inbox.insert(position, packet);
        } else {
            inbox.push_back(packet);
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Bytes>> {
        loop {
            let packet = {
                let mut link = self.link.lock();
                let inbox = &mut link.inboxes[self.side];
                match inbox.iter().position(|p| p.delay <= 0.0) {
                    Some(index) => inbox.remove(index),
                    None => None,
                }
            };

            let Some(packet) = packet else {
                return Ok(None);
            };

            if matches!(
                self.state,
                ConnectionState::Disconnected | ConnectionState::ConnectFail
            ) {
                continue;
            }

            self.accept(&packet);
            if !packet.payload.is_empty() {
                return Ok(Some(packet.payload));
            }
        }
    }

    fn update(&mut self, delta_time: f64) {
        {
            let mut link = self.link.lock();
            for packet in link.inboxes[self.side].iter_mut() {
                packet.delay -= delta_time;
            }
        }

        self.reliability.update(delta_time);
        self.timeout_accumulator += delta_time;
        if self.timeout_accumulator <= self.timeout {
            return;
        }

        match self.state {
            ConnectionState::Connecting => {
                warn!("loopback connect timed out");
                self.clear_data();
                self.state = ConnectionState::ConnectFail;
            }
            ConnectionState::Connected => {
                warn!("loopback connection timed out");
                self.clear_data();
                self.state = if self.listening {
                    ConnectionState::Listening
                } else {
                    ConnectionState::Disconnected
                };
            }
            _ => {}
        }
    }

    fn round_trip_time(&self) -> f64 {
        self.reliability.rtt()
    }

    fn stats(&self) -> LinkStats {
        LinkStats {
            rtt: self.reliability.rtt(),
            sent_packets: self.reliability.sent_packets(),
            acked_packets: self.reliability.acked_packets(),
            lost_packets: self.reliability.lost_packets(),
            sent_bandwidth: self.reliability.sent_bandwidth(),
            acked_bandwidth: self.reliability.acked_bandwidth(),
        }
    }
}
