//! 수신자 (클라이언트측)
//!
//! - 패킷 하나씩 `handle_packet`으로 공급받는 세션 (블로킹 없음)
//! - 순서 번호가 맞는 청크만 파일에 기록, 어긋난 청크는 버퍼링 없이 폐기
//! - 종료 마커 수신 시 누적 CRC-8과 비교

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::message::{Frame, Framing, FILENAME_TAG, SENTINEL};
use crate::session::{Acceptance, Role, SessionState, TransferReport, TransferSession};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 패킷 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// 파일 이름 수락, 세션 시작
    Started,
    /// 청크 반영
    Accepted,
    /// 중복, 순서 어긋남, 형식 오류로 폐기
    Dropped,
    /// 종료 마커 처리 완료 (`Complete`)
    Finished,
}

/// 파일 수신 세션
#[derive(Debug)]
pub struct FileReceiver {
    output_dir: PathBuf,
    framing: Framing,
    session: Option<TransferSession>,
    path: Option<PathBuf>,
    file: Option<BufWriter<File>>,
    /// 보낼 누적 ACK
    pending_ack: Option<u32>,
    /// 검증 실패 시 계산한 체크섬, 종료 마커가 다시 오면 재전송
    rejected: Option<u8>,
    pending_reject: bool,
    received_checksum: Option<u8>,
    stats: TransferStats,
    error: Option<String>,
}

impl FileReceiver {
    pub fn new(output_dir: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            output_dir: output_dir.into(),
            framing: config.framing,
            session: None,
            path: None,
            file: None,
            pending_ack: None,
            rejected: None,
            pending_reject: false,
            received_checksum: None,
            stats: TransferStats::new(),
            error: None,
        }
    }

    /// 패킷 하나 처리
    ///
    /// 에러는 세션을 `Failed`로 만든 경우에만 반환한다 (잘못된 파일 이름,
    /// 파일 IO, 체크섬 불일치). 형식 오류 패킷은 `Feed::Dropped`.
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<Feed> {
        if self.state().is_terminal() {
            return Ok(self.handle_after_finish(packet));
        }

        let awaiting_filename = self.session.is_none();
        let frame = match self.framing {
            Framing::Sequenced => Frame::decode_sequenced(packet),
            Framing::Unsequenced => Frame::decode_unsequenced(packet, awaiting_filename),
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) if awaiting_filename && self.framing == Framing::Unsequenced => {
                return Err(self.reject_filename(e));
            }
            Err(e) => {
                debug!("패킷 폐기: {}", e);
                self.stats.malformed_packets += 1;
                return Ok(Feed::Dropped);
            }
        };

        match frame {
            Frame::Filename(name) => self.start(name),
            Frame::Data { sequence, payload } => self.handle_data(sequence, payload),
            Frame::End {
                total_chunks,
                checksum,
            } => self.handle_end(total_chunks, checksum),
            Frame::Ack(_) | Frame::Reject { .. } => Ok(Feed::Dropped),
        }
    }

    fn start(&mut self, name: String) -> Result<Feed> {
        if let Some(session) = &self.session {
            // 파일 이름 ACK 유실 시 재전송된 프레임
            if session.filename() == name && self.framing == Framing::Sequenced {
                self.pending_ack = Some(self.last_ack_value());
            }
            return Ok(Feed::Dropped);
        }

        let session = match TransferSession::new(Role::Receiver, name) {
            Ok(session) => session,
            Err(e) => return Err(self.reject_filename(e)),
        };

        let path = self.output_dir.join(session.filename());
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path);

        let file = match file {
            Ok(file) => file,
            Err(e) => {
                let err = Error::file_io(&path, e);
                warn!("Failed to create file: {}", err);
                let mut session = session;
                session.fail();
                self.session = Some(session);
                return Err(self.record_failure(err));
            }
        };

        info!("수신 시작: {} → {}", session.filename(), path.display());
        self.stats.mark_started();
        self.file = Some(BufWriter::new(file));
        self.path = Some(path);
        self.session = Some(session);
        if self.framing == Framing::Sequenced {
            self.pending_ack = Some(FILENAME_TAG);
        }
        Ok(Feed::Started)
    }

    fn handle_data(&mut self, sequence: u32, payload: Bytes) -> Result<Feed> {
        let Some(session) = self.session.as_mut() else {
            // 파일 이름보다 먼저 도착한 청크
            self.stats.out_of_order_chunks += 1;
            return Ok(Feed::Dropped);
        };

        let acceptance = match self.framing {
            Framing::Sequenced => session.accept(sequence, &payload),
            Framing::Unsequenced => {
                session.append(&payload);
                Acceptance::Accepted
            }
        };

        match acceptance {
            Acceptance::Accepted => {
                self.stats.frames += 1;
                if self.framing == Framing::Sequenced {
                    self.pending_ack = Some(sequence);
                }
                self.write(&payload)?;
                Ok(Feed::Accepted)
            }
            Acceptance::Duplicate => {
                self.stats.duplicate_chunks += 1;
                self.pending_ack = Some(self.last_ack_value());
                Ok(Feed::Dropped)
            }
            Acceptance::OutOfOrder => {
                self.stats.out_of_order_chunks += 1;
                debug!(
                    "순서 어긋난 청크 폐기: expected {}, got {}",
                    session.expected_sequence(),
                    sequence
                );
                Ok(Feed::Dropped)
            }
        }
    }

    fn handle_end(&mut self, total_chunks: u32, checksum: u8) -> Result<Feed> {
        let Some(session) = self.session.as_mut() else {
            self.stats.out_of_order_chunks += 1;
            return Ok(Feed::Dropped);
        };

        if self.framing == Framing::Sequenced && session.expected_sequence() != total_chunks {
            // 누락된 청크가 있으면 종료 마커도 순서 어긋남으로 취급
            self.stats.out_of_order_chunks += 1;
            debug!(
                "종료 마커 폐기: {}/{} 청크 수신",
                session.expected_sequence(),
                total_chunks
            );
            return Ok(Feed::Dropped);
        }

        session.set_state(SessionState::Verifying);
        self.received_checksum = Some(checksum);

        if let Err(e) = self.close_file() {
            return Err(self.record_failure(e));
        }

        let Some(session) = self.session.as_mut() else {
            return Ok(Feed::Dropped);
        };
        match session.verify(checksum) {
            Ok(()) => {
                self.stats.mark_finished();
                if self.framing == Framing::Sequenced {
                    self.pending_ack = Some(SENTINEL);
                }
                let report = self.report();
                info!(
                    "File {} received successfully with valid checksum: 0x{:02X}",
                    report.filename, checksum
                );
                info!(
                    "Receive Time: {:.2} seconds, {:.2} Mbps",
                    report.elapsed.as_secs_f64(),
                    report.throughput_mbps()
                );
                debug!("{}", self.stats.summary());
                Ok(Feed::Finished)
            }
            Err(e) => {
                warn!("Checksum mismatch! {}", e);
                let computed = session.checksum();
                let err = self.record_failure(e);
                if self.framing == Framing::Sequenced {
                    self.rejected = Some(computed);
                    self.pending_reject = true;
                }
                Err(err)
            }
        }
    }

    /// 완료 후 도착한 패킷: 종료 마커 재전송에만 다시 응답 (ACK 또는 검증 실패)
    fn handle_after_finish(&mut self, packet: &[u8]) -> Feed {
        if self.framing != Framing::Sequenced
            || !matches!(Frame::decode_sequenced(packet), Ok(Frame::End { .. }))
        {
            return Feed::Dropped;
        }

        if self.state() == SessionState::Complete {
            self.pending_ack = Some(SENTINEL);
        } else if self.rejected.is_some() {
            self.pending_reject = true;
        }
        Feed::Dropped
    }

    fn last_ack_value(&self) -> u32 {
        self.session
            .as_ref()
            .and_then(|s| s.last_accepted())
            .unwrap_or(FILENAME_TAG)
    }

    fn write(&mut self, payload: &[u8]) -> Result<()> {
        let result = match self.file.as_mut() {
            Some(file) => file.write_all(payload),
            None => Ok(()),
        };

        if let Err(e) = result {
            let err = Error::file_io(self.path.clone().unwrap_or_default(), e);
            warn!("파일 쓰기 실패: {}", err);
            return Err(self.record_failure(err));
        }
        Ok(())
    }

    /// 버퍼 비우고 파일 닫기
    fn close_file(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .map_err(|e| Error::file_io(self.path.clone().unwrap_or_default(), e))?;
        }
        Ok(())
    }

    fn reject_filename(&mut self, err: Error) -> Error {
        warn!("Invalid filename received: {}", err);
        self.record_failure(err)
    }

    /// 세션 실패 처리: 파일은 남기고 닫는다
    fn record_failure(&mut self, err: Error) -> Error {
        if let Some(session) = self.session.as_mut() {
            session.fail();
        }
        if let Err(e) = self.close_file() {
            warn!("파일 닫기 실패: {}", e);
        }
        self.stats.mark_finished();
        self.pending_ack = None;
        self.error = Some(err.to_string());
        err
    }

    /// 보낼 응답 패킷 (검증 실패 응답이 ACK보다 먼저)
    pub fn next_packet(&mut self) -> Option<Bytes> {
        if std::mem::take(&mut self.pending_reject) {
            if let Some(checksum) = self.rejected {
                return Some(Frame::Reject { checksum }.encode(self.framing));
            }
        }
        self.pending_ack
            .take()
            .map(|ack| Frame::Ack(ack).encode(self.framing))
    }

    /// 연결 끊김 등으로 세션 폐기 (부분 파일은 그대로 둔다)
    pub fn abandon(&mut self) {
        if let Err(e) = self.close_file() {
            warn!("파일 닫기 실패: {}", e);
        }
        self.pending_ack = None;
        self.pending_reject = false;
    }

    /// 세션 상태 (파일 이름 수신 전이면 `Idle`, 잘못된 파일 이름이면 `Failed`)
    pub fn state(&self) -> SessionState {
        match &self.session {
            Some(session) => session.state(),
            None if self.error.is_some() => SessionState::Failed,
            None => SessionState::Idle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn expected_sequence(&self) -> u32 {
        self.session
            .as_ref()
            .map(|s| s.expected_sequence())
            .unwrap_or(0)
    }

    /// 기록 중이거나 기록한 파일 경로
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 세션 보고
    pub fn report(&self) -> TransferReport {
        let (role, filename, bytes, checksum) = match &self.session {
            Some(s) => (s.role(), s.filename().to_string(), s.bytes(), s.checksum()),
            None => (Role::Receiver, String::new(), 0, 0),
        };

        TransferReport {
            role,
            filename,
            bytes,
            checksum,
            state: self.state(),
            elapsed: self.stats.elapsed(),
            error: self.error.clone(),
        }
    }

    /// 수신한 종료 마커의 체크섬
    pub fn received_checksum(&self) -> Option<u8> {
        self.received_checksum
    }
}

impl Drop for FileReceiver {
    fn drop(&mut self) {
        if let Err(e) = self.close_file() {
            warn!("파일 닫기 실패: {}", e);
        }
    }
}
