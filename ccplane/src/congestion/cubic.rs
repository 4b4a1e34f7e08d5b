//! CUBIC congestion control.
//!
//! The window is kept in segments. Below `ssthresh` it grows by one segment
//! per acknowledged segment (slow start). Above it, growth follows
//!
//! ```text
//! W(t) = origin + C * (t - K)^3,   K = cbrt((W_last_max - cwnd) / C)
//! ```
//!
//! where `t` is the time since the current loss epoch began plus the minimum
//! observed RTT. Rather than jumping to `W(t)`, the window gains one segment
//! every `cnt` acks, `cnt = cwnd / (W(t) - cwnd)`. A Reno-equivalent window
//! bounds `cnt` from above so CUBIC never grows slower than a linear
//! controller would.
//!
//! On an isolated loss: `W_last_max = cwnd` (scaled by `(2 - BETA) / 2` under
//! fast convergence when the window failed to recover), `cwnd *= 1 - BETA`,
//! `ssthresh = cwnd`.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};
use crate::congestion::registry::AlgorithmRegistry;
use crate::congestion::{Controller, DropEvent, OutboundSink};
use crate::error::Result;

/// Registered name.
pub const NAME: &str = "cubic";

/// Tunables for [`Cubic`].
#[derive(Debug, Clone)]
pub struct CubicConfig {
    /// Bytes per segment.
    pub segment_size: u32,
    /// Window on creation and after a reset, in segments.
    pub initial_window: f64,
    /// Slow-start threshold on creation, in segments.
    pub initial_ssthresh: f64,
    /// Cubic scaling constant.
    pub c: f64,
    /// Multiplicative decrease factor.
    pub beta: f64,
    pub fast_convergence: bool,
    pub tcp_friendliness: bool,
    /// Time source for loss epochs.
    pub clock: Arc<dyn Clock>,
}

impl Default for CubicConfig {
    fn default() -> Self {
        Self {
            segment_size: 1460,
            initial_window: 5.0,
            initial_ssthresh: 100.0,
            c: 0.4,
            beta: 0.2,
            fast_convergence: true,
            tcp_friendliness: true,
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

/// CUBIC congestion controller.
pub struct Cubic {
    config: CubicConfig,
    sid: u32,
    sink: Option<Arc<dyn OutboundSink>>,
    /// Highest ack processed so far.
    last_ack: u32,
    /// Congestion window, in segments.
    cwnd: f64,
    ssthresh: f64,
    /// Acks counted towards the next one-segment increase.
    cwnd_cnt: f64,
    /// Acks needed per one-segment increase.
    cnt: f64,
    /// Window just before the last loss.
    w_last_max: f64,
    /// Start of the current loss epoch, in clock seconds.
    epoch_start: Option<f64>,
    origin_point: f64,
    /// Minimum observed RTT in seconds; zero until sampled.
    d_min: f64,
    /// Reno-equivalent window for TCP friendliness.
    w_tcp: f64,
    k: f64,
    ack_cnt: f64,
}

impl Cubic {
    pub fn new(config: CubicConfig) -> Self {
        let mut cubic = Self {
            sid: 0,
            sink: None,
            last_ack: 0,
            cwnd: config.initial_window,
            ssthresh: config.initial_ssthresh,
            cwnd_cnt: 0.0,
            cnt: 0.0,
            w_last_max: 0.0,
            epoch_start: None,
            origin_point: 0.0,
            d_min: 0.0,
            w_tcp: 0.0,
            k: 0.0,
            ack_cnt: 0.0,
            config,
        };
        cubic.reset();
        cubic
    }

    /// Current window in segments.
    pub fn window(&self) -> f64 {
        self.cwnd
    }

    /// Current window in bytes, as published in window updates.
    pub fn window_bytes(&self) -> u32 {
        (self.cwnd * self.config.segment_size as f64) as u32
    }

    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    pub fn w_last_max(&self) -> f64 {
        self.w_last_max
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd <= self.ssthresh
    }

    /// Whether a loss epoch is open.
    pub fn epoch_open(&self) -> bool {
        self.epoch_start.is_some()
    }

    pub fn min_rtt(&self) -> Option<Duration> {
        (self.d_min > 0.0).then(|| Duration::from_secs_f64(self.d_min))
    }

    fn reset(&mut self) {
        self.w_last_max = 0.0;
        self.epoch_start = None;
        self.origin_point = 0.0;
        self.d_min = 0.0;
        self.w_tcp = 0.0;
        self.k = 0.0;
        self.ack_cnt = 0.0;
    }

    fn now_secs(&self) -> f64 {
        self.config.clock.now().as_secs_f64()
    }

    /// Recompute `cnt` from the cubic curve. Runs once per acked segment
    /// outside slow start.
    fn cubic_update(&mut self) {
        let now = self.now_secs();
        self.ack_cnt += 1.0;

        let epoch_start = match self.epoch_start {
            Some(start) => start,
            None => {
                if self.cwnd < self.w_last_max {
                    self.k = ((self.w_last_max - self.cwnd) / self.config.c).cbrt();
                    self.origin_point = self.w_last_max;
                } else {
                    self.k = 0.0;
                    self.origin_point = self.cwnd;
                }
                self.ack_cnt = 1.0;
                self.w_tcp = self.cwnd;
                self.epoch_start = Some(now);
                now
            }
        };

        let t = now + self.d_min - epoch_start;
        let target = self.origin_point + self.config.c * (t - self.k).powi(3);
        self.cnt = if target > self.cwnd {
            self.cwnd / (target - self.cwnd)
        } else {
            100.0 * self.cwnd
        };

        if self.config.tcp_friendliness {
            self.tcp_friendliness();
        }
    }

    fn tcp_friendliness(&mut self) {
        let beta = self.config.beta;
        self.w_tcp += ((3.0 * beta) / (2.0 - beta)) * (self.ack_cnt / self.cwnd);
        self.ack_cnt = 0.0;
        if self.w_tcp > self.cwnd {
            let max_cnt = self.cwnd / (self.w_tcp - self.cwnd);
            if self.cnt > max_cnt {
                self.cnt = max_cnt;
            }
        }
    }

    fn notify_cwnd(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let window = self.window_bytes();
        if let Err(e) = sink.send_window_update(self.sid, window) {
            tracing::warn!(sid = self.sid, cwnd = window, error = %e, "window update not sent");
        }
    }
}

impl Default for Cubic {
    fn default() -> Self {
        Self::new(CubicConfig::default())
    }
}

impl Controller for Cubic {
    fn name(&self) -> &str {
        NAME
    }

    fn on_create(&mut self, sid: u32, sink: Arc<dyn OutboundSink>) {
        self.sid = sid;
        self.sink = Some(sink);
        self.last_ack = 0;
        self.cwnd = self.config.initial_window;
        self.ssthresh = self.config.initial_ssthresh;
        self.cwnd_cnt = 0.0;
        self.cnt = 0.0;
        self.reset();
    }

    fn on_ack(&mut self, ack: u32, rtt: Duration) {
        let newly_acked = ack.wrapping_sub(self.last_ack);
        if newly_acked > u32::MAX / 2 {
            tracing::debug!(sid = self.sid, ack, last_ack = self.last_ack, "stale ack ignored");
            return;
        }

        let segments = newly_acked / self.config.segment_size.max(1);
        let rtt = rtt.as_secs_f64();
        for _ in 0..segments {
            if rtt > 0.0 && (self.d_min <= 0.0 || rtt < self.d_min) {
                self.d_min = rtt;
            }
            if self.cwnd <= self.ssthresh {
                self.cwnd += 1.0;
            } else {
                self.cubic_update();
                if self.cwnd_cnt > self.cnt {
                    self.cwnd += 1.0;
                    self.cwnd_cnt = 0.0;
                } else {
                    self.cwnd_cnt += 1.0;
                }
            }
        }

        self.notify_cwnd();
        tracing::debug!(
            sid = self.sid,
            ack,
            last_ack = self.last_ack,
            newly_acked,
            cwnd = self.window_bytes(),
            "cubic ack"
        );
        self.last_ack = ack;
    }

    fn on_drop(&mut self, event: DropEvent) {
        match event {
            DropEvent::Isolated => {
                let beta = self.config.beta;
                self.epoch_start = None;
                self.w_last_max = if self.cwnd < self.w_last_max && self.config.fast_convergence {
                    self.cwnd * ((2.0 - beta) / 2.0)
                } else {
                    self.cwnd
                };
                self.cwnd *= 1.0 - beta;
                self.ssthresh = self.cwnd;
            }
            DropEvent::Complete => {
                self.cwnd = self.config.initial_window;
                self.ssthresh = self.config.initial_ssthresh;
                self.cwnd_cnt = 0.0;
                self.cnt = 0.0;
                self.reset();
            }
            DropEvent::Unknown(_) => {
                tracing::warn!(sid = self.sid, %event, "unknown drop event ignored");
                return;
            }
        }

        tracing::info!(sid = self.sid, %event, cwnd = self.window_bytes(), "cubic drop");
        self.notify_cwnd();
    }
}

/// Register CUBIC with `registry`; every instance shares `config`.
pub fn register(registry: &AlgorithmRegistry, config: CubicConfig) -> Result<()> {
    registry.register(NAME, move || Box::new(Cubic::new(config.clone())))
}
