//! Probe metrics: RTT statistics, RFC 3550 jitter and an E-model voice quality estimate
//!
//! Everything in here is pure computation over the samples a target monitor feeds in.
//!
//! ## Voice quality model
//!
//! ```text
//! Ta     = RTT / 2                                  (one-way delay)
//! Ppl    = 2.0 if J > 30, 0.5 if J > 10, else 0     (loss proxy derived from jitter)
//! Id     = 0                          if Ta <= 100
//!          0.024 Ta [+ 0.11 (Ta - 177.3) if Ta > 177.3]
//! Ie_eff = Ie + (95 - Ie) Ppl / (Ppl + Bpl) + J / 20
//! R      = clamp(R0 - Is - Id - Ie_eff + A, 0, 100)
//! MOS    = clamp(1 + 0.035 R + 7e-6 R (R - 60) (100 - R), 1, 5)
//! ```

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of recent RTT samples kept as jitter input
pub const RECENT_RTT_CAPACITY: usize = 5;

/// EWMA gain denominator from RFC 3550
const JITTER_GAIN: f64 = 16.0;

const R0: f64 = 93.2;
const IS: f64 = 1.4;
const BPL: f64 = 10.0;
const IE_BASE: f64 = 0.0;
const ADVANTAGE: f64 = 0.0;

/// Jitter value used instead of an exact zero
const MIN_JITTER: f64 = 0.1;

/// One EWMA step: `J + (|rtt - previous| - J) / 16`
pub fn next_jitter(jitter: f64, previous_rtt: f64, rtt: f64) -> f64 {
    jitter + ((rtt - previous_rtt).abs() - jitter) / JITTER_GAIN
}

/// R-factor and Mean Opinion Score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceQuality {
    pub r_factor: u8,
    pub mos: f64,
}

impl VoiceQuality {
    pub fn estimate(rtt: f64, jitter: f64) -> Self {
        let jitter = if jitter == 0.0 { MIN_JITTER } else { jitter };
        let one_way = rtt / 2.0;

        let loss_proxy = if jitter > 30.0 {
            2.0
        } else if jitter > 10.0 {
            0.5
        } else {
            0.0
        };

        let delay_impairment = if one_way <= 100.0 {
            0.0
        } else if one_way > 177.3 {
            0.024 * one_way + 0.11 * (one_way - 177.3)
        } else {
            0.024 * one_way
        };

        let equipment_impairment =
            IE_BASE + (95.0 - IE_BASE) * loss_proxy / (loss_proxy + BPL) + jitter / 20.0;

        let r = (R0 - IS - delay_impairment - equipment_impairment + ADVANTAGE)
            .clamp(0.0, 100.0)
            .round();

        let mos = (1.0 + 0.035 * r + 7e-6 * r * (r - 60.0) * (100.0 - r)).clamp(1.0, 5.0);

        Self {
            r_factor: r as u8,
            mos,
        }
    }

    /// ITU-T G.107 user satisfaction band for the R-factor
    pub fn rating(&self) -> &'static str {
        match self.r_factor {
            90..=u8::MAX => "excellent",
            80..=89 => "good",
            70..=79 => "fair",
            60..=69 => "poor",
            _ => "bad",
        }
    }
}

/// Rolling RTT state of one target
#[derive(Debug, Clone, Default)]
pub struct RttTracker {
    recent: VecDeque<f64>,
    jitter: f64,
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    samples: u64,
    last_rtt: Option<f64>,
    last_ttl: Option<u32>,
}

impl RttTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rtt: f64, ttl: Option<u32>) {
        if let Some(&previous) = self.recent.back() {
            self.jitter = next_jitter(self.jitter, previous, rtt);
        }

        if self.recent.len() == RECENT_RTT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(rtt);

        self.min = Some(self.min.map_or(rtt, |min| min.min(rtt)));
        self.max = Some(self.max.map_or(rtt, |max| max.max(rtt)));
        self.sum += rtt;
        self.samples += 1;
        self.last_rtt = Some(rtt);
        if ttl.is_some() {
            self.last_ttl = ttl;
        }
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn recent(&self) -> impl Iterator<Item = f64> + '_ {
        self.recent.iter().copied()
    }

    pub fn average(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum / self.samples as f64)
    }

    pub fn last_rtt(&self) -> Option<f64> {
        self.last_rtt
    }

    /// Start a new report window; jitter history carries over
    pub fn reset_window(&mut self) {
        self.min = None;
        self.max = None;
        self.sum = 0.0;
        self.samples = 0;
    }

    /// Forget everything, including jitter history
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let reference = self.average().or(self.last_rtt);
        MetricsSnapshot {
            rtt_min: self.min,
            rtt_avg: self.average(),
            rtt_max: self.max,
            ttl: self.last_ttl,
            jitter: self.last_rtt.map(|_| self.jitter),
            quality: reference.map(|rtt| VoiceQuality::estimate(rtt, self.jitter)),
        }
    }
}

/// Metrics of one report window; `None` renders as `N/A`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub rtt_min: Option<f64>,
    pub rtt_avg: Option<f64>,
    pub rtt_max: Option<f64>,
    pub ttl: Option<u32>,
    pub jitter: Option<f64>,
    pub quality: Option<VoiceQuality>,
}

impl MetricsSnapshot {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Formats an optional value with a fixed precision, or `N/A`
pub struct OrNa<T>(pub Option<T>, pub usize);

impl<T: fmt::Display> fmt::Display for OrNa<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => write!(f, "{value:.prec$}", prec = self.1),
            None => write!(f, "N/A"),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rtt={}/{}/{} ms ttl={} jitter={} ms mos={} r={}",
            OrNa(self.rtt_min, 2),
            OrNa(self.rtt_avg, 2),
            OrNa(self.rtt_max, 2),
            OrNa(self.ttl, 0),
            OrNa(self.jitter, 2),
            OrNa(self.quality.map(|q| q.mos), 2),
            OrNa(self.quality.map(|q| q.r_factor), 0),
        )
    }
}
