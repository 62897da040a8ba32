//! 패킷 전송 계층
//!
//! 전송 루프는 [`Transport`] 트레이트만 알고, 실제 구현은 주입된다.
//! - [`UdpTransport`]: UDP 위 가상 연결 (프로토콜 ID, 타임아웃, RTT 측정)
//! - [`crate::loopback::LoopbackTransport`]: 테스트용 메모리 내 링크
//!
//! 모든 송수신은 논블로킹 폴링이며, 빈 페이로드는 keep-alive로 취급되어
//! 상위 계층에 전달되지 않는다.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::reliability::ReliabilitySystem;
use crate::stats::LinkStats;
use crate::{Error, Result, MAX_PAYLOAD_SIZE};

/// 전송 계층 인터페이스
pub trait Transport {
    /// 상대 주소로 연결 시도
    fn connect(&mut self, address: SocketAddr);

    /// 연결 대기
    fn listen(&mut self);

    fn is_connected(&self) -> bool;

    fn connect_failed(&self) -> bool;

    /// 패킷 송신 (연결 상대가 없으면 무시)
    fn send_packet(&mut self, payload: &[u8]) -> Result<()>;

    /// 대기 중인 패킷 하나 수신 (없으면 `None`)
    fn receive_packet(&mut self) -> Result<Option<Bytes>>;

    /// 타이머 진행
    fn update(&mut self, delta_time: f64);

    /// 현재 RTT (초)
    fn round_trip_time(&self) -> f64;

    fn stats(&self) -> LinkStats;
}

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Listening,
    Connecting,
    ConnectFail,
    Connected,
}

/// 연결 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionMode {
    Client,
    Server,
}

/// 전송 계층 패킷 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub protocol_id: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bits: u32,
}

/// 헤더 직렬화 크기 (bincode 고정 길이 u32 × 4)
pub const PACKET_HEADER_LEN: usize = 16;

/// RTT 최대값 (초), 이보다 늦은 ACK은 손실로 집계
pub const RTT_MAXIMUM: f64 = 1.0;

/// UDP 가상 연결
pub struct UdpTransport {
    socket: UdpSocket,
    protocol_id: u32,
    timeout: f64,
    state: ConnectionState,
    mode: Option<ConnectionMode>,
    address: Option<SocketAddr>,
    timeout_accumulator: f64,
    reliability: ReliabilitySystem,
    recv_buf: Vec<u8>,
}

impl UdpTransport {
    /// 로컬 주소에 바인딩
    pub async fn bind(local_addr: SocketAddr, protocol_id: u32, timeout: f64) -> Result<Self> {
        let socket = UdpSocket::bind(local_addr)
            .await
            .map_err(|source| Error::TransportInit {
                addr: local_addr.to_string(),
                source,
            })?;

        info!("UDP transport bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            protocol_id,
            timeout,
            state: ConnectionState::Disconnected,
            mode: None,
            address: None,
            timeout_accumulator: 0.0,
            reliability: ReliabilitySystem::new(RTT_MAXIMUM),
            recv_buf: vec![0u8; PACKET_HEADER_LEN + MAX_PAYLOAD_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 연결 상대 주소
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.address
    }

    /// 소켓이 읽기 가능해질 때까지 대기
    pub async fn readable(&self) -> Result<()> {
        Ok(self.socket.readable().await?)
    }

    fn clear_data(&mut self) {
        self.address = None;
        self.timeout_accumulator = 0.0;
        self.reliability.reset();
    }

    fn encode_header(&self) -> Result<Vec<u8>> {
        let header = PacketHeader {
            protocol_id: self.protocol_id,
            sequence: self.reliability.local_sequence(),
            ack: self.reliability.remote_sequence(),
            ack_bits: self.reliability.generate_ack_bits(),
        };
        Ok(bincode::serialize(&header)?)
    }

    /// 수신 패킷 처리, 상위 계층에 전달할 페이로드 반환
    fn accept_datagram(&mut self, len: usize, from: SocketAddr) -> Option<Bytes> {
        if len < PACKET_HEADER_LEN {
            return None;
        }

        let header: PacketHeader = bincode::deserialize(&self.recv_buf[..PACKET_HEADER_LEN]).ok()?;
        if header.protocol_id != self.protocol_id {
            return None;
        }

        match self.state {
            ConnectionState::Listening => {
                info!("server accepts connection from client {}", from);
                self.state = ConnectionState::Connected;
                self.address = Some(from);
            }
            _ if self.address != Some(from) => return None,
            ConnectionState::Connecting => {
                info!("client completes connection with server {}", from);
                self.state = ConnectionState::Connected;
            }
            _ => {}
        }

        if self.state != ConnectionState::Connected {
            return None;
        }

        self.timeout_accumulator = 0.0;
        let payload_len = len - PACKET_HEADER_LEN;
        self.reliability.packet_received(header.sequence, payload_len);
        self.reliability.process_ack(header.ack, header.ack_bits);

        if payload_len == 0 {
            return None;
        }
        Some(Bytes::copy_from_slice(
            &self.recv_buf[PACKET_HEADER_LEN..len],
        ))
    }
}

impl Transport for UdpTransport {
    fn connect(&mut self, address: SocketAddr) {
        info!("client connecting to {}", address);
        self.clear_data();
        self.mode = Some(ConnectionMode::Client);
        self.state = ConnectionState::Connecting;
        self.address = Some(address);
    }

    fn listen(&mut self) {
        info!("server listening for connection");
        self.clear_data();
        self.mode = Some(ConnectionMode::Server);
        self.state = ConnectionState::Listening;
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn connect_failed(&self) -> bool {
        self.state == ConnectionState::ConnectFail
    }

    fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        let Some(address) = self.address else {
            return Ok(());
        };

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::MalformedFrame {
                len: payload.len(),
                reason: "최대 페이로드 초과",
            });
        }

        let mut packet = self.encode_header()?;
        packet.extend_from_slice(payload);

        match self.socket.try_send_to(&packet, address) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("송신 버퍼 가득 참, 패킷 폐기");
            }
            Err(e) => return Err(e.into()),
        }

        self.reliability.packet_sent(payload.len());
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Bytes>> {
        loop {
            let (len, from) = match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // ICMP port unreachable 등은 연결 타임아웃으로 처리
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };

            if let Some(payload) = self.accept_datagram(len, from) {
                return Ok(Some(payload));
            }
        }
    }

    fn update(&mut self, delta_time: f64) {
        self.reliability.update(delta_time);
        self.timeout_accumulator += delta_time;

        if self.timeout_accumulator <= self.timeout {
            return;
        }

        match self.state {
            ConnectionState::Connecting => {
                warn!("connect timed out");
                self.clear_data();
                self.state = ConnectionState::ConnectFail;
            }
            ConnectionState::Connected => {
                warn!("connection timed out");
                self.clear_data();
                self.state = match self.mode {
                    Some(ConnectionMode::Server) => ConnectionState::Listening,
                    _ => ConnectionState::Disconnected,
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
