//! 고정 시간 간격 전송 루프
//!
//! 한 번의 `tick`마다:
//! 1. RTT로 흐름 제어 갱신
//! 2. 연결 변화 감지 (연결 시 세션 시작, 끊김 시 세션 폐기)
//! 3. 송신 속도에 맞춰 패킷 송신 (세션 프레임 또는 keep-alive)
//! 4. 수신 패킷을 세션에 공급
//! 5. 전송 계층 타이머 진행
//! 6. 주기적 링크 통계 로그

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::flow::RateController;
use crate::receiver::FileReceiver;
use crate::sender::FileSender;
use crate::session::{Role, SessionState, TransferReport};
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// 루프 역할
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// 연결 대기 후 파일 송신
    Server { source: PathBuf },
    /// 서버에 연결해 파일 수신
    Client { peer: SocketAddr, output_dir: PathBuf },
}

/// 연결 하나에 대응하는 세션
#[derive(Debug)]
enum ActiveSession {
    Sending(FileSender),
    Receiving(FileReceiver),
}

impl ActiveSession {
    fn next_packet(&mut self) -> Option<Bytes> {
        match self {
            Self::Sending(sender) => sender.next_packet(),
            Self::Receiving(receiver) => receiver.next_packet(),
        }
    }

    fn handle_packet(&mut self, packet: &[u8]) -> Result<()> {
        match self {
            Self::Sending(sender) => sender.handle_packet(packet),
            Self::Receiving(receiver) => receiver.handle_packet(packet).map(|_| ()),
        }
    }

    fn update(&mut self, delta_time: f64) -> Result<()> {
        match self {
            Self::Sending(sender) => sender.update(delta_time),
            Self::Receiving(_) => Ok(()),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Self::Sending(sender) => sender.is_finished(),
            Self::Receiving(receiver) => receiver.is_finished(),
        }
    }

    fn report(&self) -> TransferReport {
        match self {
            Self::Sending(sender) => sender.report(),
            Self::Receiving(receiver) => receiver.report(),
        }
    }

    /// 끝나지 않은 세션 폐기, 실패 보고 반환
    fn abandon(mut self, reason: &Error) -> TransferReport {
        if let Self::Receiving(receiver) = &mut self {
            receiver.abandon();
        }
        let mut report = self.report();
        if !report.state.is_terminal() {
            report.state = SessionState::Failed;
            report.error = Some(reason.to_string());
        }
        report
    }
}

/// 전송 루프
pub struct TransferLoop<T: Transport> {
    transport: T,
    config: Config,
    endpoint: Endpoint,
    flow: RateController,

    send_accumulator: f64,
    stats_accumulator: f64,
    connected: bool,

    session: Option<ActiveSession>,
    /// 현재 세션의 보고를 이미 남겼는지
    reported: bool,
    /// 수신 완료 후 경과 시간
    linger: f64,

    reports: Vec<TransferReport>,
    done: bool,
}

impl<T: Transport> TransferLoop<T> {
    pub fn new(transport: T, endpoint: Endpoint, config: Config) -> Result<Self> {
        config.validate()?;
        let flow = RateController::new(config.flow.clone());

        Ok(Self {
            transport,
            config,
            endpoint,
            flow,
            send_accumulator: 0.0,
            stats_accumulator: 0.0,
            connected: false,
            session: None,
            reported: false,
            linger: 0.0,
            reports: Vec::new(),
            done: false,
        })
    }

    /// 연결 대기 또는 연결 시도 시작
    pub fn start(&mut self) {
        match &self.endpoint {
            Endpoint::Server { source } => {
                info!("server serving {} (listening)", source.display());
                self.transport.listen();
            }
            Endpoint::Client { peer, .. } => {
                info!("client connecting to {}", peer);
                self.transport.connect(*peer);
            }
        }
    }

    /// 루프 한 단계 진행
    pub fn tick(&mut self, delta_time: f64) -> Result<()> {
        if self.done {
            return Ok(());
        }

        if self.transport.is_connected() {
            let rtt_ms = self.transport.round_trip_time() * 1000.0;
            self.flow.update(delta_time, rtt_ms);
        }

        self.detect_connection_change()?;
        self.send_paced(delta_time)?;
        self.receive_all()?;
        self.advance_session(delta_time);
        self.transport.update(delta_time);
        self.log_stats(delta_time);

        Ok(())
    }

    fn detect_connection_change(&mut self) -> Result<()> {
        let connected = self.transport.is_connected();

        if self.connected && !connected {
            warn!("connection lost");
            self.connected = false;
            self.flow.reset();
            self.send_accumulator = 0.0;
            self.stats_accumulator = 0.0;

            let finished = self.session.as_ref().is_some_and(ActiveSession::is_finished);
            if let Some(session) = self.session.take() {
                if !finished {
                    self.reports.push(session.abandon(&Error::ConnectionLost));
                }
            }
            self.reported = false;
            self.linger = 0.0;

            if let Endpoint::Client { .. } = self.endpoint {
                self.done = true;
                if !finished {
                    return Err(Error::ConnectionLost);
                }
            }
            return Ok(());
        }

        if !self.connected && connected {
            info!("connected");
            self.connected = true;
            self.start_session();
        }

        if let Endpoint::Client { peer, .. } = &self.endpoint {
            if self.transport.connect_failed() {
                self.done = true;
                return Err(Error::ConnectFailed {
                    addr: peer.to_string(),
                });
            }
        }

        Ok(())
    }

    fn start_session(&mut self) {
        self.reported = false;
        self.linger = 0.0;

        match &self.endpoint {
            Endpoint::Server { source } => match FileSender::open(source, &self.config) {
                Ok(sender) => self.session = Some(ActiveSession::Sending(sender)),
                Err(e) => {
                    warn!("파일 송신 불가: {}", e);
                    self.reports.push(TransferReport {
                        role: Role::Sender,
                        filename: source.display().to_string(),
                        bytes: 0,
                        checksum: 0,
                        state: SessionState::Failed,
                        elapsed: Duration::ZERO,
                        error: Some(e.to_string()),
                    });
                    self.reported = true;
                    if self.config.exit_after_transfer {
                        self.done = true;
                    }
                }
            },
            Endpoint::Client { output_dir, .. } => {
                let receiver = FileReceiver::new(output_dir.clone(), &self.config);
                self.session = Some(ActiveSession::Receiving(receiver));
            }
        }
    }

    fn send_paced(&mut self, delta_time: f64) -> Result<()> {
        self.send_accumulator += delta_time;
        let interval = self.flow.send_interval();

        while self.send_accumulator > interval {
            let packet = self
                .session
                .as_mut()
                .and_then(ActiveSession::next_packet)
                .unwrap_or_default();
            self.transport.send_packet(&packet)?;
            self.send_accumulator -= interval;
        }
        Ok(())
    }

    fn receive_all(&mut self) -> Result<()> {
        while let Some(packet) = self.transport.receive_packet()? {
            let Some(session) = self.session.as_mut() else {
                continue;
            };
            if let Err(e) = session.handle_packet(&packet) {
                if session.is_finished() {
                    warn!("세션 실패: {}", e);
                } else {
                    debug!("패킷 무시: {}", e);
                }
            }
        }
        Ok(())
    }

    fn advance_session(&mut self, delta_time: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Err(e) = session.update(delta_time) {
            warn!("세션 실패: {}", e);
        }

        if !session.is_finished() {
            return;
        }

        if !self.reported {
            let report = session.report();
            if report.is_complete() {
                info!("transfer of {} complete", report.filename);
            }
            self.reports.push(report);
            self.reported = true;
        }

        match self.endpoint {
            Endpoint::Server { .. } => {
                if self.config.exit_after_transfer {
                    self.done = true;
                }
            }
            Endpoint::Client { .. } => {
                // 송신측이 종료 ACK을 못 받았을 때를 대비해 잠시 응답 유지
                self.linger += delta_time;
                if self.linger >= self.config.linger_time {
                    self.done = true;
                }
            }
        }
    }

    fn log_stats(&mut self, delta_time: f64) {
        if !self.connected {
            return;
        }
        self.stats_accumulator += delta_time;
        while self.stats_accumulator >= self.config.stats_interval {
            info!("{}", self.transport.stats().summary());
            self.stats_accumulator -= self.config.stats_interval;
        }
    }

    /// 실행 중인 세션 정리 (Ctrl-C 등)
    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            if !self.reported {
                self.reports.push(session.abandon(&Error::ConnectionLost));
            }
        }
        self.done = true;
    }

    /// `tokio::time::interval`로 `tick`을 구동, 종료 또는 Ctrl-C까지
    pub async fn run(&mut self) -> Result<()> {
        let delta_time = self.config.delta_time;
        let mut interval = tokio::time::interval(Duration::from_secs_f64(delta_time));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.start();

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let result = loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("interrupted");
                    break Ok(());
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick(delta_time) {
                        break Err(e);
                    }
                    if self.done {
                        break Ok(());
                    }
                }
            }
        };

        self.shutdown();
        result
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// 지금까지 끝난 세션 보고
    pub fn reports(&self) -> &[TransferReport] {
        &self.reports
    }

    pub fn rate_controller(&self) -> &RateController {
        &self.flow
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LinkConditions, LoopbackTransport};
    use std::fs;

    const DT: f64 = 1.0 / 30.0;

    fn peer() -> SocketAddr {
        "127.0.0.1:30000".parse().unwrap()
    }

    fn build(
        source: PathBuf,
        output_dir: PathBuf,
        config: Config,
        conditions: LinkConditions,
    ) -> (TransferLoop<LoopbackTransport>, TransferLoop<LoopbackTransport>) {
        let (client_link, server_link) = LoopbackTransport::pair(conditions, config.connection_timeout);
        let mut server =
            TransferLoop::new(server_link, Endpoint::Server { source }, config.clone()).unwrap();
        let mut client = TransferLoop::new(
            client_link,
            Endpoint::Client {
                peer: peer(),
                output_dir,
            },
            config,
        )
        .unwrap();
        server.start();
        client.start();
        (server, client)
    }

    #[test]
    fn test_small_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("small.txt");
        fs::write(&source, b"hello, paced world").unwrap();
        let out = tempfile::tempdir().unwrap();

        let config = Config {
            exit_after_transfer: true,
            ..Config::default()
        };
        let (mut server, mut client) = build(
            source,
            out.path().to_path_buf(),
            config,
            LinkConditions::default(),
        );

        for _ in 0..1000 {
            server.tick(DT).unwrap();
            client.tick(DT).unwrap();
            if server.is_done() && client.is_done() {
                break;
            }
        }

        assert!(server.is_done() && client.is_done());
        assert!(server.reports()[0].is_complete());
        assert!(client.reports()[0].is_complete());
        assert_eq!(
            fs::read(out.path().join("small.txt")).unwrap(),
            b"hello, paced world"
        );
    }

    #[test]
    fn test_missing_source_reports_failure() {
        let out = tempfile::tempdir().unwrap();
        let config = Config {
            exit_after_transfer: true,
            ..Config::default()
        };
        let (mut server, mut client) = build(
            out.path().join("does-not-exist.bin"),
            out.path().to_path_buf(),
            config,
            LinkConditions::default(),
        );

        for _ in 0..100 {
            server.tick(DT).unwrap();
            client.tick(DT).unwrap();
            if server.is_done() {
                break;
            }
        }

        assert!(server.is_done());
        let report = &server.reports()[0];
        assert_eq!(report.state, SessionState::Failed);
        assert!(report.error.as_deref().unwrap().contains("does-not-exist.bin"));
    }

    #[test]
    fn test_missing_source_keeps_listening() {
        let out = tempfile::tempdir().unwrap();
        let (mut server, mut client) = build(
            out.path().join("does-not-exist.bin"),
            out.path().to_path_buf(),
            Config::default(),
            LinkConditions::default(),
        );

        for _ in 0..100 {
            server.tick(DT).unwrap();
            client.tick(DT).unwrap();
        }

        assert_eq!(server.reports().len(), 1);
        assert_eq!(server.reports()[0].state, SessionState::Failed);
        assert!(server.is_connected());
        assert!(!server.is_done());
        assert!(client.is_connected());
        assert!(!client.is_done());
    }

    #[test]
    fn test_connect_failed() {
        let out = tempfile::tempdir().unwrap();
        let config = Config {
            connection_timeout: 1.0,
            ..Config::default()
        };
        let (client_link, _server_link) = LoopbackTransport::pair(LinkConditions::default(), 1.0);
        let mut client = TransferLoop::new(
            client_link,
            Endpoint::Client {
                peer: peer(),
                output_dir: out.path().to_path_buf(),
            },
            config,
        )
        .unwrap();
        client.start();

        let mut result = Ok(());
        for _ in 0..60 {
            result = client.tick(DT);
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(Error::ConnectFailed { .. })));
        assert!(client.is_done());
    }

    #[test]
    fn test_starts_in_bad_mode() {
        let out = tempfile::tempdir().unwrap();
        let (server, _client) = build(
            out.path().join("x"),
            out.path().to_path_buf(),
            Config::default(),
            LinkConditions::default(),
        );
        assert!(!server.rate_controller().is_good());
        assert_eq!(server.rate_controller().send_rate(), 10.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (link, _) = LoopbackTransport::pair(LinkConditions::default(), 10.0);
        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        let result = TransferLoop::new(
            link,
            Endpoint::Server {
                source: PathBuf::from("x"),
            },
            config,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
