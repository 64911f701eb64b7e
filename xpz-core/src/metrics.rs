//! Runtime counters and span names.
//!
//! Counters are plain `AtomicU64`s bumped on the hot path with relaxed
//! ordering and read on export. A snapshot renders as Prometheus text.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for engine events.
#[derive(Debug, Default)]
pub struct XpzCounters {
    /// Text events that earned XP.
    pub text_awarded: AtomicU64,
    /// Text events rejected by the filter (duplicates included).
    pub text_rejected: AtomicU64,
    /// Text events rejected as duplicates.
    pub text_duplicates: AtomicU64,
    /// Voice awards granted.
    pub voice_awarded: AtomicU64,
    /// Voice awards skipped by the interval throttle.
    pub voice_throttled: AtomicU64,
    /// Valid sessions that failed an eligibility rule.
    pub voice_ineligible: AtomicU64,
    /// Stale sessions removed during sweeps.
    pub sessions_healed: AtomicU64,
    /// Level-up crossings.
    pub level_ups: AtomicU64,
    /// Completed prestige transitions.
    pub prestiges: AtomicU64,
    /// Role or notification side effects that failed.
    pub effect_failures: AtomicU64,
    /// Side effects dropped because the queue was full.
    pub effects_dropped: AtomicU64,
}

impl XpzCounters {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to `counter`.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            text_awarded: load(&self.text_awarded),
            text_rejected: load(&self.text_rejected),
            text_duplicates: load(&self.text_duplicates),
            voice_awarded: load(&self.voice_awarded),
            voice_throttled: load(&self.voice_throttled),
            voice_ineligible: load(&self.voice_ineligible),
            sessions_healed: load(&self.sessions_healed),
            level_ups: load(&self.level_ups),
            prestiges: load(&self.prestiges),
            effect_failures: load(&self.effect_failures),
            effects_dropped: load(&self.effects_dropped),
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct CounterSnapshot {
    pub text_awarded: u64,
    pub text_rejected: u64,
    pub text_duplicates: u64,
    pub voice_awarded: u64,
    pub voice_throttled: u64,
    pub voice_ineligible: u64,
    pub sessions_healed: u64,
    pub level_ups: u64,
    pub prestiges: u64,
    pub effect_failures: u64,
    pub effects_dropped: u64,
}

impl CounterSnapshot {
    fn rows(&self) -> [(&'static str, &'static str, u64); 11] {
        [
            ("xpz_text_awarded_total", "Text events that earned XP", self.text_awarded),
            ("xpz_text_rejected_total", "Text events rejected by the filter", self.text_rejected),
            (
                "xpz_text_duplicates_total",
                "Text events rejected as duplicates",
                self.text_duplicates,
            ),
            ("xpz_voice_awarded_total", "Voice awards granted", self.voice_awarded),
            (
                "xpz_voice_throttled_total",
                "Voice awards skipped by the throttle",
                self.voice_throttled,
            ),
            (
                "xpz_voice_ineligible_total",
                "Voice sessions failing eligibility",
                self.voice_ineligible,
            ),
            ("xpz_sessions_healed_total", "Stale voice sessions removed", self.sessions_healed),
            ("xpz_level_ups_total", "Level-up crossings", self.level_ups),
            ("xpz_prestiges_total", "Prestige transitions", self.prestiges),
            (
                "xpz_effect_failures_total",
                "Failed role or notification effects",
                self.effect_failures,
            ),
            ("xpz_effects_dropped_total", "Effects dropped on a full queue", self.effects_dropped),
        ]
    }

    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        for (name, help, value) in self.rows() {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}

/// Span names used with `tracing` spans.
pub mod spans {
    /// One text event.
    pub const TEXT_EVENT: &str = "xpz::text";
    /// One voice-state change.
    pub const VOICE_CHANGE: &str = "xpz::voice::change";
    /// One voice sweep.
    pub const VOICE_TICK: &str = "xpz::voice::tick";
    /// Effect worker drain.
    pub const EFFECTS: &str = "xpz::effects";
}
