//! 전송 통계

use std::time::{Duration, Instant};

/// 전송 계층 링크 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkStats {
    /// 평균 RTT (초)
    pub rtt: f64,

    /// 송신 패킷 수
    pub sent_packets: u32,

    /// ACK 받은 패킷 수
    pub acked_packets: u32,

    /// 손실 패킷 수
    pub lost_packets: u32,

    /// 송신 대역폭 (kbps)
    pub sent_bandwidth: f64,

    /// ACK 대역폭 (kbps)
    pub acked_bandwidth: f64,
}

impl LinkStats {
    /// 손실률 (%)
    pub fn loss_percent(&self) -> f64 {
        if self.sent_packets == 0 {
            return 0.0;
        }
        self.lost_packets as f64 / self.sent_packets as f64 * 100.0
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "rtt {:.1}ms, sent {}, acked {}, lost {} ({:.1}%), sent bandwidth = {:.1}kbps, acked bandwidth = {:.1}kbps",
            self.rtt * 1000.0,
            self.sent_packets,
            self.acked_packets,
            self.lost_packets,
            self.loss_percent(),
            self.sent_bandwidth,
            self.acked_bandwidth,
        )
    }
}

/// 세션 전송 통계
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// 첫 프레임 송수신 시각
    pub start_time: Option<Instant>,

    /// 종료 시각
    pub end_time: Option<Instant>,

    /// 송수신 프레임 수
    pub frames: u64,

    /// 재전송 프레임 수
    pub retransmitted_frames: u64,

    /// 중복 수신 청크 수
    pub duplicate_chunks: u64,

    /// 순서가 어긋나 버린 청크 수
    pub out_of_order_chunks: u64,

    /// 형식 오류로 버린 패킷 수
    pub malformed_packets: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 첫 활동 기록
    pub fn mark_started(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    /// 종료 기록
    pub fn mark_finished(&mut self) {
        self.mark_started();
        if self.end_time.is_none() {
            self.end_time = Some(Instant::now());
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Frames: {} | Retransmitted: {} | Duplicates: {} | Out-of-order: {} | Malformed: {}",
            self.elapsed().as_secs_f64(),
            self.frames,
            self.retransmitted_frames,
            self.duplicate_chunks,
            self.out_of_order_chunks,
            self.malformed_packets,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_percent() {
        let stats = LinkStats {
            sent_packets: 200,
            lost_packets: 5,
            ..LinkStats::default()
        };
        assert!((stats.loss_percent() - 2.5).abs() < 1e-9);
        assert_eq!(LinkStats::default().loss_percent(), 0.0);
    }

    #[test]
    fn test_link_summary() {
        let stats = LinkStats {
            rtt: 0.05,
            sent_packets: 10,
            acked_packets: 9,
            lost_packets: 1,
            sent_bandwidth: 64.0,
            acked_bandwidth: 57.6,
        };
        assert_eq!(
            stats.summary(),
            "rtt 50.0ms, sent 10, acked 9, lost 1 (10.0%), sent bandwidth = 64.0kbps, acked bandwidth = 57.6kbps"
        );
    }

    #[test]
    fn test_elapsed_frozen_after_finish() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.elapsed(), Duration::ZERO);

        stats.mark_started();
        stats.mark_finished();
        let elapsed = stats.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(stats.elapsed(), elapsed);
    }
}
