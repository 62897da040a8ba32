//! RTT 기반 송신 속도 제어
//!
//! 대역폭 측정이 아닌 히스테리시스 방식:
//! - Good 모드 (30 packets/sec): RTT가 임계값을 넘으면 즉시 Bad로 강등
//! - Bad 모드 (10 packets/sec): 양호한 상태가 penalty 시간 이상 지속되면 Good으로 승격
//! - Good 진입 직후 다시 강등되면 penalty 두 배, Good이 오래 유지되면 penalty 절반

use tracing::info;

/// 흐름 제어 파라미터
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// 모드 판정 RTT 임계값 (밀리초)
    pub rtt_threshold_ms: f64,

    /// Good 모드 송신 속도 (packets/sec)
    pub good_send_rate: f64,

    /// Bad 모드 송신 속도 (packets/sec)
    pub bad_send_rate: f64,

    /// 초기 penalty 시간 (초)
    pub initial_penalty: f64,

    /// penalty 하한 (초)
    pub min_penalty: f64,

    /// penalty 상한 (초)
    pub max_penalty: f64,

    /// Good 진입 후 이 시간 안에 강등되면 penalty 두 배 (초)
    pub quick_drop_window: f64,

    /// Good 유지 중 penalty 절반 주기 (초)
    pub penalty_reduction_interval: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            rtt_threshold_ms: 250.0,
            good_send_rate: 30.0,
            bad_send_rate: 10.0,
            initial_penalty: 4.0,
            min_penalty: 1.0,
            max_penalty: 60.0,
            quick_drop_window: 10.0,
            penalty_reduction_interval: 10.0,
        }
    }
}

/// 네트워크 품질 모드 (히스테리시스 카운터 포함)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowMode {
    Good {
        /// Good 진입 후 경과 시간
        good_time: f64,
        /// penalty 절반 누산기
        reduction_time: f64,
    },
    Bad {
        /// 연속 양호 시간 (RTT 초과 시 0)
        good_time: f64,
    },
}

impl FlowMode {
    pub fn is_good(&self) -> bool {
        matches!(self, FlowMode::Good { .. })
    }
}

/// 흐름 제어 상태
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowState {
    pub mode: FlowMode,
    pub penalty_time: f64,
}

impl FlowState {
    /// 초기 상태: Bad 모드, 초기 penalty
    pub fn initial(config: &FlowConfig) -> Self {
        Self {
            mode: FlowMode::Bad { good_time: 0.0 },
            penalty_time: config.initial_penalty,
        }
    }

    /// 상태 전이 (순수 함수)
    pub fn advance(self, delta_time: f64, rtt_ms: f64, config: &FlowConfig) -> Self {
        let over_threshold = rtt_ms > config.rtt_threshold_ms;

        match self.mode {
            FlowMode::Good {
                good_time,
                reduction_time,
            } => {
                if over_threshold {
                    let mut penalty_time = self.penalty_time;
                    if good_time < config.quick_drop_window && penalty_time < config.max_penalty {
                        penalty_time = (penalty_time * 2.0).min(config.max_penalty);
                    }
                    return Self {
                        mode: FlowMode::Bad { good_time: 0.0 },
                        penalty_time,
                    };
                }

                let good_time = good_time + delta_time;
                let mut reduction_time = reduction_time + delta_time;
                let mut penalty_time = self.penalty_time;

                if reduction_time > config.penalty_reduction_interval
                    && penalty_time > config.min_penalty
                {
                    penalty_time = (penalty_time / 2.0).max(config.min_penalty);
                    reduction_time = 0.0;
                }

                Self {
                    mode: FlowMode::Good {
                        good_time,
                        reduction_time,
                    },
                    penalty_time,
                }
            }
            FlowMode::Bad { good_time } => {
                let good_time = if over_threshold {
                    0.0
                } else {
                    good_time + delta_time
                };

                if good_time > self.penalty_time {
                    return Self {
                        mode: FlowMode::Good {
                            good_time: 0.0,
                            reduction_time: 0.0,
                        },
                        penalty_time: self.penalty_time,
                    };
                }

                Self {
                    mode: FlowMode::Bad { good_time },
                    penalty_time: self.penalty_time,
                }
            }
        }
    }

    /// 현재 모드의 송신 속도 (packets/sec)
    pub fn send_rate(&self, config: &FlowConfig) -> f64 {
        if self.mode.is_good() {
            config.good_send_rate
        } else {
            config.bad_send_rate
        }
    }
}

/// 송신 속도 제어기
#[derive(Debug, Clone)]
pub struct RateController {
    config: FlowConfig,
    state: FlowState,
}

impl RateController {
    pub fn new(config: FlowConfig) -> Self {
        info!("flow control initialized");
        let state = FlowState::initial(&config);
        Self { config, state }
    }

    /// 초기 상태로 복귀
    pub fn reset(&mut self) {
        self.state = FlowState::initial(&self.config);
    }

    /// RTT 샘플 반영
    pub fn update(&mut self, delta_time: f64, rtt_ms: f64) {
        let previous = self.state;
        self.state = previous.advance(delta_time, rtt_ms, &self.config);

        match (previous.mode.is_good(), self.state.mode.is_good()) {
            (true, false) => info!(rtt_ms, "*** dropping to bad mode ***"),
            (false, true) => info!(rtt_ms, "*** upgrading to good mode ***"),
            _ => {}
        }

        if self.state.penalty_time > previous.penalty_time {
            info!("penalty time increased to {:.1}", self.state.penalty_time);
        } else if self.state.penalty_time < previous.penalty_time {
            info!("penalty time reduced to {:.1}", self.state.penalty_time);
        }
    }

    /// 현재 송신 속도 (packets/sec)
    pub fn send_rate(&self) -> f64 {
        self.state.send_rate(&self.config)
    }

    /// 패킷 간 송신 간격 (초)
    pub fn send_interval(&self) -> f64 {
        1.0 / self.send_rate()
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn penalty_time(&self) -> f64 {
        self.state.penalty_time
    }

    pub fn is_good(&self) -> bool {
        self.state.mode.is_good()
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(FlowConfig::default())
    }
}
