//! 패킷 순서 번호 / ACK 비트필드 기반 링크 측정
//!
//! 재전송은 하지 않는다. 송신 패킷마다 순서 번호를 붙이고, 상대가 보내는
//! 패킷 헤더의 `ack` + 32비트 `ack_bits`로 어떤 패킷이 도착했는지 파악해
//! RTT, 손실, 대역폭을 추정한다.

use std::collections::VecDeque;

/// 순서 번호 비교 (wraparound 고려)
pub fn sequence_more_recent(s1: u32, s2: u32) -> bool {
    s1 != s2 && s1.wrapping_sub(s2) < 0x8000_0000
}

/// `ack` 기준으로 `sequence`의 비트 위치 (ack - 1 → 0)
fn bit_index_for_sequence(sequence: u32, ack: u32) -> u32 {
    ack.wrapping_sub(sequence).wrapping_sub(1)
}

#[derive(Debug, Clone, Copy)]
struct PacketData {
    sequence: u32,
    /// 큐에 들어온 후 경과 시간 (초)
    time: f64,
    size: usize,
}

/// 순서 번호 정렬 큐
#[derive(Debug, Default)]
struct PacketQueue {
    packets: VecDeque<PacketData>,
}

impl PacketQueue {
    fn exists(&self, sequence: u32) -> bool {
        self.packets.iter().any(|p| p.sequence == sequence)
    }

    fn insert_sorted(&mut self, packet: PacketData) {
        let position = self
            .packets
            .iter()
            .rposition(|p| sequence_more_recent(packet.sequence, p.sequence))
            .map(|i| i + 1)
            .unwrap_or(0);
        self.packets.insert(position, packet);
    }

    fn advance(&mut self, delta_time: f64) {
        for packet in self.packets.iter_mut() {
            packet.time += delta_time;
        }
    }

    fn total_size(&self) -> usize {
        self.packets.iter().map(|p| p.size).sum()
    }
}

/// 링크 측정 시스템
#[derive(Debug)]
pub struct ReliabilitySystem {
    /// RTT 최대값, 이보다 오래 ACK 없는 패킷은 손실 (초)
    rtt_maximum: f64,

    local_sequence: u32,
    remote_sequence: u32,

    sent_packets: u32,
    lost_packets: u32,
    acked_packets: u32,

    sent_bandwidth: f64,
    acked_bandwidth: f64,
    rtt: f64,

    sent_queue: PacketQueue,
    pending_ack_queue: PacketQueue,
    received_queue: PacketQueue,
    acked_queue: PacketQueue,
}

impl ReliabilitySystem {
    pub fn new(rtt_maximum: f64) -> Self {
        Self {
            rtt_maximum,
            local_sequence: 0,
            remote_sequence: 0,
            sent_packets: 0,
            lost_packets: 0,
            acked_packets: 0,
            sent_bandwidth: 0.0,
            acked_bandwidth: 0.0,
            rtt: 0.0,
            sent_queue: PacketQueue::default(),
            pending_ack_queue: PacketQueue::default(),
            received_queue: PacketQueue::default(),
            acked_queue: PacketQueue::default(),
        }
    }

    /// 모든 상태 초기화
    pub fn reset(&mut self) {
        *self = Self::new(self.rtt_maximum);
    }

    /// 패킷 송신 기록
    pub fn packet_sent(&mut self, size: usize) {
        let packet = PacketData {
            sequence: self.local_sequence,
            time: 0.0,
            size,
        };
        self.sent_queue.packets.push_back(packet);
        self.pending_ack_queue.packets.push_back(packet);
        self.sent_packets = self.sent_packets.wrapping_add(1);
        self.local_sequence = self.local_sequence.wrapping_add(1);
    }

    /// 패킷 수신 기록
    pub fn packet_received(&mut self, sequence: u32, size: usize) {
        if self.received_queue.exists(sequence) {
            return;
        }

        self.received_queue.insert_sorted(PacketData {
            sequence,
            time: 0.0,
            size,
        });
        if sequence_more_recent(sequence, self.remote_sequence) {
            self.remote_sequence = sequence;
        }
    }

    /// 수신 큐에서 `remote_sequence` 이전 32개 패킷의 도착 비트필드
    pub fn generate_ack_bits(&self) -> u32 {
        self.received_queue
            .packets
            .iter()
            .filter(|p| p.sequence != self.remote_sequence)
            .filter(|p| !sequence_more_recent(p.sequence, self.remote_sequence))
            .map(|p| bit_index_for_sequence(p.sequence, self.remote_sequence))
            .filter(|&bit| bit <= 31)
            .fold(0u32, |bits, bit| bits | (1 << bit))
    }

    /// 상대 헤더의 ACK 처리
    pub fn process_ack(&mut self, ack: u32, ack_bits: u32) {
        let mut still_pending = VecDeque::with_capacity(self.pending_ack_queue.packets.len());

        while let Some(packet) = self.pending_ack_queue.packets.pop_front() {
            let acked = if packet.sequence == ack {
                true
            } else if !sequence_more_recent(packet.sequence, ack) {
                let bit = bit_index_for_sequence(packet.sequence, ack);
                bit <= 31 && (ack_bits >> bit) & 1 == 1
            } else {
                false
            };

            if acked {
                self.rtt += (packet.time - self.rtt) * 0.1;
                self.acked_queue.insert_sorted(packet);
                self.acked_packets = self.acked_packets.wrapping_add(1);
            } else {
                still_pending.push_back(packet);
            }
        }

        self.pending_ack_queue.packets = still_pending;
    }

    /// 시간 진행, 오래된 패킷 정리 및 통계 갱신
    pub fn update(&mut self, delta_time: f64) {
        self.sent_queue.advance(delta_time);
        self.received_queue.advance(delta_time);
        self.pending_ack_queue.advance(delta_time);
        self.acked_queue.advance(delta_time);
        self.update_queues();
        self.update_stats();
    }

    fn update_queues(&mut self) {
        const EPSILON: f64 = 0.001;

        while self
            .sent_queue
            .packets
            .front()
            .is_some_and(|p| p.time > self.rtt_maximum + EPSILON)
        {
            self.sent_queue.packets.pop_front();
        }

        if let Some(latest) = self.received_queue.packets.back().map(|p| p.sequence) {
            let minimum = latest.wrapping_sub(34);
            while self
                .received_queue
                .packets
                .front()
                .is_some_and(|p| !sequence_more_recent(p.sequence, minimum))
            {
                self.received_queue.packets.pop_front();
            }
        }

        while self
            .acked_queue
            .packets
            .front()
            .is_some_and(|p| p.time > self.rtt_maximum * 2.0 - EPSILON)
        {
            self.acked_queue.packets.pop_front();
        }

        while self
            .pending_ack_queue
            .packets
            .front()
            .is_some_and(|p| p.time > self.rtt_maximum + EPSILON)
        {
            self.pending_ack_queue.packets.pop_front();
            self.lost_packets = self.lost_packets.wrapping_add(1);
        }
    }

    fn update_stats(&mut self) {
        let sent_bytes_per_second = self.sent_queue.total_size() as f64 / self.rtt_maximum;
        let acked_bytes_per_second = self.acked_queue.total_size() as f64 / self.rtt_maximum;
        self.sent_bandwidth = sent_bytes_per_second * 8.0 / 1000.0;
        self.acked_bandwidth = acked_bytes_per_second * 8.0 / 1000.0;
    }

    pub fn local_sequence(&self) -> u32 {
        self.local_sequence
    }

    pub fn remote_sequence(&self) -> u32 {
        self.remote_sequence
    }

    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    pub fn sent_packets(&self) -> u32 {
        self.sent_packets
    }

    pub fn acked_packets(&self) -> u32 {
        self.acked_packets
    }

    pub fn lost_packets(&self) -> u32 {
        self.lost_packets
    }

    pub fn sent_bandwidth(&self) -> f64 {
        self.sent_bandwidth
    }

    pub fn acked_bandwidth(&self) -> f64 {
        self.acked_bandwidth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_wraparound() {
        assert!(sequence_more_recent(1, 0));
        assert!(!sequence_more_recent(0, 1));
        assert!(!sequence_more_recent(5, 5));
        assert!(sequence_more_recent(0, u32::MAX));
        assert!(sequence_more_recent(10, u32::MAX - 10));
        assert!(!sequence_more_recent(u32::MAX - 10, 10));
    }

    #[test]
    fn test_ack_bits() {
        let mut system = ReliabilitySystem::new(1.0);
        for sequence in [0u32, 1, 2, 4, 5] {
            system.packet_received(sequence, 100);
        }

        assert_eq!(system.remote_sequence(), 5);
        // 4 → bit 0, 2 → bit 2, 1 → bit 3, 0 → bit 4
        assert_eq!(system.generate_ack_bits(), 0b11101);
    }

    #[test]
    fn test_process_ack_and_rtt() {
        let mut system = ReliabilitySystem::new(1.0);
        for _ in 0..3 {
            system.packet_sent(256);
        }
        system.update(0.1);

        system.process_ack(2, 0b11);
        assert_eq!(system.acked_packets(), 3);
        assert!(system.pending_ack_queue.packets.is_empty());
        assert!(system.rtt() > 0.0);
        assert!(system.rtt() <= 0.1);
    }

    #[test]
    fn test_unacked_packets_are_lost() {
        let mut system = ReliabilitySystem::new(1.0);
        system.packet_sent(100);
        system.packet_sent(100);
        system.process_ack(1, 0);

        for _ in 0..40 {
            system.update(1.0 / 30.0);
        }

        assert_eq!(system.acked_packets(), 1);
        assert_eq!(system.lost_packets(), 1);
        assert_eq!(system.sent_packets(), 2);
    }

    #[test]
    fn test_bandwidth() {
        let mut system = ReliabilitySystem::new(1.0);
        for _ in 0..10 {
            system.packet_sent(1000);
        }
        system.update(0.01);
        assert!((system.sent_bandwidth() - 80.0).abs() < 1e-9);
        assert_eq!(system.acked_bandwidth(), 0.0);
    }

    #[test]
    fn test_duplicate_receive_ignored() {
        let mut system = ReliabilitySystem::new(1.0);
        system.packet_received(3, 10);
        system.packet_received(3, 10);
        assert_eq!(system.received_queue.packets.len(), 1);
        assert_eq!(system.generate_ack_bits(), 0);
    }
}
