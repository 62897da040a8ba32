//! 송신자 (서버측)
//!
//! - 파일 이름 → 청크 → 종료 마커 순서로 프레임 송신
//! - 송신 시점은 전송 루프의 pacing이 결정 (`next_packet` 호출마다 한 프레임)
//! - 순서 번호 모드: 누적 ACK + go-back-N 재전송

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::checksum::FileSummary;
use crate::chunk::{Chunk, ChunkBuilder};
use crate::message::{Frame, Framing, FILENAME_TAG, SENTINEL};
use crate::session::{filename_from_path, Role, SessionState, TransferReport, TransferSession};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 파일 송신 세션
#[derive(Debug)]
pub struct FileSender {
    session: TransferSession,
    framing: Framing,
    chunks: Vec<Chunk>,
    summary: FileSummary,

    /// 최대 전송 중 프레임 수
    window: usize,
    retransmit_timeout: f64,
    max_retransmits: u32,

    /// 첫 미확인 프레임 인덱스
    base: usize,
    /// 다음 송신 프레임 인덱스
    next: usize,
    /// 한 번이라도 송신한 프레임 수
    high_water: usize,

    /// 마지막 ACK 진전 이후 경과 시간
    since_progress: f64,
    /// 연속 재전송 타임아웃 횟수
    timeouts: u32,

    stats: TransferStats,
    error: Option<String>,
}

impl FileSender {
    /// 원본 파일을 한 번 읽어 세션 생성
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|e| Error::file_io(path, e))?;
        let filename = filename_from_path(path)?;

        info!("Loading file: {:?}", path);
        Self::new(filename, Bytes::from(content), config)
    }

    /// 메모리 내용으로 세션 생성
    pub fn new(filename: impl Into<String>, content: Bytes, config: &Config) -> Result<Self> {
        let session = TransferSession::new(Role::Sender, filename)?;
        let chunks = ChunkBuilder::new(config.chunk_size, config.framing)?.split(&content)?;
        let summary = FileSummary::of(&content);

        info!(
            "파일 {}: {} ({} 청크, {} bytes/청크)",
            session.filename(),
            summary,
            chunks.len(),
            config.chunk_size
        );

        Ok(Self {
            session,
            framing: config.framing,
            chunks,
            summary,
            window: match config.framing {
                Framing::Sequenced => config.send_window,
                Framing::Unsequenced => usize::MAX,
            },
            retransmit_timeout: config.retransmit_timeout,
            max_retransmits: config.max_retransmits,
            base: 0,
            next: 0,
            high_water: 0,
            since_progress: 0.0,
            timeouts: 0,
            stats: TransferStats::new(),
            error: None,
        })
    }

    /// 파일 이름 + 청크 + 종료 마커
    fn total_frames(&self) -> usize {
        self.chunks.len() + 2
    }

    fn frame_at(&self, index: usize) -> Frame {
        if index == 0 {
            Frame::Filename(self.session.filename().to_string())
        } else if index <= self.chunks.len() {
            let chunk = &self.chunks[index - 1];
            Frame::Data {
                sequence: chunk.sequence,
                payload: chunk.data.clone(),
            }
        } else {
            Frame::End {
                total_chunks: self.chunks.len() as u32,
                checksum: self.summary.crc,
            }
        }
    }

    /// 다음에 보낼 프레임 (없으면 `None`, 루프는 keep-alive 송신)
    pub fn next_packet(&mut self) -> Option<Bytes> {
        if self.session.state().is_terminal()
            || self.next >= self.total_frames()
            || self.next >= self.base.saturating_add(self.window)
        {
            return None;
        }

        let index = self.next;
        if index < self.high_water {
            self.stats.retransmitted_frames += 1;
        } else {
            self.high_water = index + 1;
            // high_water 는 한 칸씩만 증가하므로 청크는 순서대로 누적된다
            if let Some(chunk) = index.checked_sub(1).and_then(|i| self.chunks.get(i)) {
                self.session.accept(chunk.sequence, &chunk.data);
            }
        }

        let bytes = self.frame_at(index).encode(self.framing);
        self.stats.mark_started();
        self.stats.frames += 1;
        if self.session.state() == SessionState::Idle {
            self.session.set_state(SessionState::Transferring);
        }
        self.next += 1;

        if self.next == self.total_frames() {
            self.session.set_state(SessionState::Verifying);
            if self.framing == Framing::Unsequenced {
                self.finish();
            }
        }

        Some(bytes)
    }

    /// 수신측 패킷 처리 (ACK, 검증 실패 응답)
    ///
    /// 검증 실패 응답을 받으면 세션을 `Failed`로 만들고 `Error::Integrity`를 반환한다.
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<()> {
        if self.framing == Framing::Unsequenced || self.session.state().is_terminal() {
            return Ok(());
        }

        let ack = match Frame::decode_reply(packet)? {
            Frame::Ack(ack) => ack,
            Frame::Reject { checksum } => return self.handle_reject(checksum),
            _ => return Ok(()),
        };
        let index = match ack {
            FILENAME_TAG => 0,
            SENTINEL => self.total_frames() - 1,
            sequence if (sequence as usize) < self.chunks.len() => sequence as usize + 1,
            sequence => {
                warn!("알 수 없는 ACK 무시: {}", sequence);
                return Ok(());
            }
        };

        if index >= self.high_water {
            debug!("보내지 않은 프레임 {} 에 대한 ACK 무시", index);
            return Ok(());
        }

        if index >= self.base {
            self.base = index + 1;
            self.next = self.next.max(self.base);
            self.since_progress = 0.0;
            self.timeouts = 0;
        }

        if self.base == self.total_frames() {
            self.finish();
        }

        Ok(())
    }

    fn handle_reject(&mut self, computed: u8) -> Result<()> {
        if self.high_water < self.total_frames() {
            debug!("종료 마커 송신 전 검증 실패 응답 무시");
            return Ok(());
        }

        let err = Error::Integrity {
            expected: self.summary.crc,
            computed,
        };
        warn!("파일 {} 수신측 검증 실패: {}", self.session.filename(), err);
        self.session.fail();
        self.stats.mark_finished();
        self.error = Some(err.to_string());
        Err(err)
    }

    /// 재전송 타이머 진행
    pub fn update(&mut self, delta_time: f64) -> Result<()> {
        if self.framing == Framing::Unsequenced
            || self.session.state().is_terminal()
            || self.next == self.base
        {
            return Ok(());
        }

        self.since_progress += delta_time;
        if self.since_progress < self.retransmit_timeout {
            return Ok(());
        }

        self.since_progress = 0.0;
        self.timeouts += 1;

        if self.timeouts > self.max_retransmits {
            let err = Error::RetransmitLimit {
                retries: self.max_retransmits,
            };
            warn!("파일 {} 송신 실패: {}", self.session.filename(), err);
            self.session.fail();
            self.stats.mark_finished();
            self.error = Some(err.to_string());
            return Err(err);
        }

        debug!(
            "ACK 타임아웃: 프레임 {} 부터 재전송 ({}/{})",
            self.base, self.timeouts, self.max_retransmits
        );
        self.next = self.base;
        Ok(())
    }

    fn finish(&mut self) {
        self.session.set_state(SessionState::Complete);
        self.stats.mark_finished();

        let report = self.report();
        info!(
            "File {} sent with CRC 0x{:02X}.",
            report.filename, report.checksum
        );
        info!("Transmission Time: {:.2} seconds", report.elapsed.as_secs_f64());
        info!("Transfer Speed: {:.2} Mbps", report.throughput_mbps());
        debug!("{}", self.stats.summary());
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_finished(&self) -> bool {
        self.session.state().is_terminal()
    }

    pub fn summary(&self) -> FileSummary {
        self.summary
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 세션 보고
    pub fn report(&self) -> TransferReport {
        TransferReport {
            role: self.session.role(),
            filename: self.session.filename().to_string(),
            bytes: self.summary.size,
            checksum: self.summary.crc,
            state: self.session.state(),
            elapsed: self.stats.elapsed(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::crc8;

    fn pattern(len: usize) -> Bytes {
        (0..len).map(|i| (i * 13 % 256) as u8).collect::<Vec<_>>().into()
    }

    fn drain(sender: &mut FileSender) -> Vec<Bytes> {
        std::iter::from_fn(|| sender.next_packet()).collect()
    }

    #[test]
    fn test_unsequenced_frame_order() {
        let data = pattern(600);
        let mut sender = FileSender::new("a.bin", data.clone(), &Config::unsequenced()).unwrap();

        let packets = drain(&mut sender);
        assert_eq!(packets.len(), 1 + 3 + 1);
        assert_eq!(&packets[0][..], b"a.bin\0");
        assert_eq!(&packets[1][..], &data[..256]);
        assert_eq!(&packets[3][..], &data[512..]);
        assert_eq!(&packets[4][..], &[crc8(&data)]);
        assert_eq!(sender.state(), SessionState::Complete);
    }

    #[test]
    fn test_window_limits_in_flight() {
        let config = Config {
            send_window: 4,
            ..Config::default()
        };
        let mut sender = FileSender::new("a.bin", pattern(10_000), &config).unwrap();

        assert_eq!(drain(&mut sender).len(), 4);
        assert_eq!(sender.state(), SessionState::Transferring);

        sender.handle_packet(&FILENAME_TAG.to_be_bytes()).unwrap();
        sender.handle_packet(&1u32.to_be_bytes()).unwrap();
        assert_eq!(drain(&mut sender).len(), 3);
    }

    #[test]
    fn test_cumulative_ack_completes() {
        let data = pattern(1000);
        let mut sender = FileSender::new("a.bin", data.clone(), &Config::default()).unwrap();

        let packets = drain(&mut sender);
        assert_eq!(packets.len(), 1 + 4 + 1);
        assert_eq!(sender.state(), SessionState::Verifying);

        let end = Frame::decode_sequenced(packets.last().unwrap()).unwrap();
        assert_eq!(
            end,
            Frame::End {
                total_chunks: 4,
                checksum: crc8(&data)
            }
        );

        sender.handle_packet(&3u32.to_be_bytes()).unwrap();
        assert_eq!(sender.state(), SessionState::Verifying);
        sender.handle_packet(&SENTINEL.to_be_bytes()).unwrap();
        assert_eq!(sender.state(), SessionState::Complete);

        let report = sender.report();
        assert!(report.is_complete());
        assert_eq!(report.bytes, 1000);
        assert_eq!(report.checksum, crc8(&data));
    }

    #[test]
    fn test_timeout_rewinds_to_first_unacked() {
        let mut sender = FileSender::new("a.bin", pattern(1000), &Config::default()).unwrap();
        drain(&mut sender);

        sender.handle_packet(&FILENAME_TAG.to_be_bytes()).unwrap();
        sender.handle_packet(&0u32.to_be_bytes()).unwrap();

        sender.update(0.5).unwrap();
        assert!(sender.next_packet().is_none());
        sender.update(0.6).unwrap();

        let resent = sender.next_packet().unwrap();
        assert_eq!(
            Frame::decode_sequenced(&resent).unwrap(),
            Frame::Data {
                sequence: 1,
                payload: pattern(1000).slice(256..512)
            }
        );
        assert_eq!(sender.stats().retransmitted_frames, 1);
    }

    #[test]
    fn test_retransmit_limit_fails() {
        let config = Config {
            max_retransmits: 2,
            ..Config::default()
        };
        let mut sender = FileSender::new("a.bin", pattern(100), &config).unwrap();

        for _ in 0..2 {
            assert_eq!(drain(&mut sender).len(), 3);
            sender.update(1.0).unwrap();
        }
        drain(&mut sender);
        let err = sender.update(1.0).unwrap_err();
        assert!(matches!(err, Error::RetransmitLimit { retries: 2 }));
        assert_eq!(sender.state(), SessionState::Failed);
        assert!(sender.next_packet().is_none());
        assert!(sender.report().error.is_some());
    }

    #[test]
    fn test_unknown_ack_ignored() {
        let mut sender = FileSender::new("a.bin", pattern(100), &Config::default()).unwrap();
        drain(&mut sender);
        sender.handle_packet(&99u32.to_be_bytes()).unwrap();
        assert_eq!(sender.state(), SessionState::Verifying);
        assert!(sender.handle_packet(&[1, 2]).is_err());
    }

    #[test]
    fn test_ack_for_unsent_frame_ignored() {
        let mut sender = FileSender::new("a.bin", pattern(1000), &Config::default()).unwrap();
        sender.next_packet().unwrap();
        sender.next_packet().unwrap();

        // 청크 0 까지만 보냄, 청크 2 ACK은 무시
        sender.handle_packet(&2u32.to_be_bytes()).unwrap();
        assert_eq!(sender.state(), SessionState::Transferring);

        let rest = drain(&mut sender);
        assert_eq!(rest.len(), 4);
        assert_eq!(
            Frame::decode_sequenced(&rest[0]).unwrap(),
            Frame::Data {
                sequence: 1,
                payload: pattern(1000).slice(256..512)
            }
        );
        assert_eq!(sender.stats().retransmitted_frames, 0);
        assert_eq!(sender.state(), SessionState::Verifying);

        sender.handle_packet(&SENTINEL.to_be_bytes()).unwrap();
        assert_eq!(sender.state(), SessionState::Complete);
    }

    #[test]
    fn test_early_sentinel_ack_ignored() {
        let mut sender = FileSender::new("a.bin", pattern(1000), &Config::default()).unwrap();
        sender.next_packet().unwrap();

        sender.handle_packet(&SENTINEL.to_be_bytes()).unwrap();
        sender.handle_packet(&FILENAME_TAG.to_be_bytes()).unwrap();
        assert_eq!(sender.state(), SessionState::Transferring);
        assert_eq!(drain(&mut sender).len(), 5);
    }

    #[test]
    fn test_reject_reports_integrity() {
        let data = pattern(600);
        let mut sender = FileSender::new("a.bin", data.clone(), &Config::default()).unwrap();
        drain(&mut sender);

        let computed = crc8(&data) ^ 0x01;
        let reply = Frame::Reject { checksum: computed }.encode(Framing::Sequenced);
        let err = sender.handle_packet(&reply).unwrap_err();

        assert!(matches!(
            err,
            Error::Integrity { expected, computed: c } if expected == crc8(&data) && c == computed
        ));
        assert_eq!(sender.state(), SessionState::Failed);
        assert!(sender.next_packet().is_none());
        assert!(sender.report().error.unwrap().contains("체크섬"));
    }

    #[test]
    fn test_reject_before_end_ignored() {
        let mut sender = FileSender::new("a.bin", pattern(600), &Config::default()).unwrap();
        sender.next_packet().unwrap();

        let reply = Frame::Reject { checksum: 0 }.encode(Framing::Sequenced);
        sender.handle_packet(&reply).unwrap();
        assert_eq!(sender.state(), SessionState::Transferring);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSender::open(dir.path().join("missing.bin"), &Config::default()).unwrap_err();
        assert!(matches!(err, Error::FileIo { .. }));
    }

    #[test]
    fn test_open_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, pattern(300)).unwrap();

        let sender = FileSender::open(&path, &Config::default()).unwrap();
        assert_eq!(sender.chunk_count(), 2);
        assert_eq!(sender.summary().size, 300);
        assert_eq!(sender.report().filename, "data.bin");
    }
}
