//! Configuration for the XPZ engine.
//!
//! Maps directly to `xpz.toml`. Every field has a default so an empty file
//! yields the stock tuning.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XpzError};
use crate::rewards::{RewardMode, RoleReward};
use crate::types::ChannelId;

/// Environment variable overriding [`NotificationConfig::level_up_channel`].
pub const ENV_LEVEL_UP_CHANNEL: &str = "XPZ_LEVELUP_CHANNEL_ID";
/// Environment variable overriding [`PersistenceConfig::path`].
pub const ENV_DATABASE_PATH: &str = "XPZ_DATABASE_PATH";

/// Top-level XPZ configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XpzConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Text XP and anti-farm tuning.
    #[serde(default)]
    pub text: TextXpConfig,
    /// Voice XP tuning.
    #[serde(default)]
    pub voice: VoiceXpConfig,
    /// Prestige threshold and bonus.
    #[serde(default)]
    pub prestige: PrestigeConfig,
    /// Level → role rewards.
    #[serde(default)]
    pub rewards: RewardConfig,
    /// Where level-up and prestige announcements go.
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// SQLite settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Side-effect queue settings.
    #[serde(default)]
    pub effects: EffectsConfig,
}

impl XpzConfig {
    /// Load and validate configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `XpzError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| XpzError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Overlay values from the process environment.
    ///
    /// # Errors
    /// Returns `XpzError::Config` if a variable is set but malformed.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlay values from an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns `XpzError::Config` if a variable is set but malformed.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(ENV_LEVEL_UP_CHANNEL).filter(|v| !v.trim().is_empty()) {
            let id = raw.trim().parse::<u64>().map_err(|e| {
                XpzError::Config(format!("{ENV_LEVEL_UP_CHANNEL}={raw:?} is not a channel id: {e}"))
            })?;
            self.notifications.level_up_channel = Some(ChannelId(id));
        }
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|v| !v.trim().is_empty()) {
            self.persistence.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    /// Returns `XpzError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let t = &self.text;
        if t.xp_min > t.xp_max {
            return Err(XpzError::Config(format!(
                "text.xp_min ({}) exceeds text.xp_max ({})",
                t.xp_min, t.xp_max
            )));
        }
        for (name, value) in [
            ("text.cooldown_seconds", t.cooldown_seconds),
            ("text.duplicate_window_seconds", t.duplicate_window_seconds),
            ("text.rapid_window_seconds", t.rapid_window_seconds),
            ("voice.award_interval_seconds", self.voice.award_interval_seconds),
        ] {
            if value < 0 {
                return Err(XpzError::Config(format!("{name} must not be negative (got {value})")));
            }
        }
        if self.voice.tick_interval_seconds == 0 {
            return Err(XpzError::Config("voice.tick_interval_seconds must be positive".into()));
        }
        let bonus = self.prestige.xp_bonus_per_prestige;
        if !bonus.is_finite() || bonus < 0.0 {
            return Err(XpzError::Config(format!(
                "prestige.xp_bonus_per_prestige must be a non-negative number (got {bonus})"
            )));
        }
        let mut seen = HashSet::new();
        for reward in &self.rewards.roles {
            if !seen.insert(reward.level) {
                return Err(XpzError::Config(format!(
                    "rewards.roles lists level {} more than once",
                    reward.level
                )));
            }
        }
        if self.effects.max_queue_size == 0 {
            return Err(XpzError::Config("effects.max_queue_size must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Text XP amounts and anti-farm windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextXpConfig {
    /// Smallest random award per qualifying message.
    #[serde(default = "default_15")]
    pub xp_min: u32,
    /// Largest random award per qualifying message.
    #[serde(default = "default_25")]
    pub xp_max: u32,
    /// Minimum seconds between two text awards.
    #[serde(default = "default_60")]
    pub cooldown_seconds: i64,
    /// Minimum normalized length (characters) for a message to qualify.
    #[serde(default = "default_6")]
    pub min_length: usize,
    /// Identical messages within this many seconds are suppressed.
    #[serde(default = "default_120")]
    pub duplicate_window_seconds: i64,
    /// Messages within this many seconds of the previous one are suppressed.
    #[serde(default = "default_8")]
    pub rapid_window_seconds: i64,
    /// Reject messages made only of emoji.
    #[serde(default = "default_true")]
    pub block_only_emojis: bool,
    /// Channels that never earn text XP.
    #[serde(default)]
    pub exempt_channels: HashSet<ChannelId>,
}

impl Default for TextXpConfig {
    fn default() -> Self {
        Self {
            xp_min: 15,
            xp_max: 25,
            cooldown_seconds: 60,
            min_length: 6,
            duplicate_window_seconds: 120,
            rapid_window_seconds: 8,
            block_only_emojis: true,
            exempt_channels: HashSet::new(),
        }
    }
}

/// Voice XP amounts, eligibility and polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceXpConfig {
    /// Flat base XP per voice award.
    #[serde(default = "default_5")]
    pub xp_per_award: u32,
    /// Minimum seconds between two voice awards.
    #[serde(default = "default_60")]
    pub award_interval_seconds: i64,
    /// Minimum non-bot members in the channel (including the member).
    #[serde(default = "default_2_usize")]
    pub min_members: usize,
    /// Muted or deafened members earn nothing.
    #[serde(default = "default_true")]
    pub require_unmuted: bool,
    /// Seconds between eligibility sweeps.
    #[serde(default = "default_15_u64")]
    pub tick_interval_seconds: u64,
    /// Upper bound for one directory lookup before it counts as "not found".
    #[serde(default = "default_5000")]
    pub lookup_timeout_ms: u64,
    /// Voice channels that never earn XP and are not tracked.
    #[serde(default)]
    pub exempt_channels: HashSet<ChannelId>,
}

impl Default for VoiceXpConfig {
    fn default() -> Self {
        Self {
            xp_per_award: 5,
            award_interval_seconds: 60,
            min_members: 2,
            require_unmuted: true,
            tick_interval_seconds: 15,
            lookup_timeout_ms: 5000,
            exempt_channels: HashSet::new(),
        }
    }
}

/// Prestige threshold and the per-tier XP bonus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrestigeConfig {
    /// Level required before a member may prestige.
    #[serde(default = "default_100")]
    pub min_level: u32,
    /// Fractional XP bonus per prestige tier (0.05 = +5%).
    #[serde(default = "default_bonus")]
    pub xp_bonus_per_prestige: f64,
}

impl PrestigeConfig {
    /// The per-tier bonus in basis points (0.05 → 500).
    #[must_use]
    pub fn bonus_basis_points(&self) -> u64 {
        let bp = (self.xp_bonus_per_prestige * 10_000.0).round();
        if bp.is_finite() && bp > 0.0 {
            bp as u64
        } else {
            0
        }
    }
}

impl Default for PrestigeConfig {
    fn default() -> Self {
        Self {
            min_level: 100,
            xp_bonus_per_prestige: 0.05,
        }
    }
}

/// Level thresholds that hand out roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Threshold list; order does not matter.
    #[serde(default)]
    pub roles: Vec<RoleReward>,
    /// Stack every earned role, or keep only the highest.
    #[serde(default)]
    pub mode: RewardMode,
}

/// Announcement routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Fixed channel for level-up and prestige announcements. When unset the
    /// channel of the triggering message is used, if any.
    #[serde(default)]
    pub level_up_channel: Option<ChannelId>,
}

/// SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// How long SQLite waits on a locked database (ms).
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            wal_mode: true,
            busy_timeout_ms: 5000,
        }
    }
}

/// Side-effect queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectsConfig {
    /// Pending effects beyond this are dropped (and counted).
    #[serde(default = "default_1024")]
    pub max_queue_size: usize,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self { max_queue_size: 1024 }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_db_path() -> PathBuf { PathBuf::from("levels.sqlite") }
fn default_bonus() -> f64 { 0.05 }
fn default_2_usize() -> usize { 2 }
fn default_5() -> u32 { 5 }
fn default_6() -> usize { 6 }
fn default_8() -> i64 { 8 }
fn default_15() -> u32 { 15 }
fn default_15_u64() -> u64 { 15 }
fn default_25() -> u32 { 25 }
fn default_60() -> i64 { 60 }
fn default_100() -> u32 { 100 }
fn default_120() -> i64 { 120 }
fn default_1024() -> usize { 1024 }
fn default_5000() -> u64 { 5000 }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleId;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = XpzConfig::from_toml("").expect("parse");
        assert_eq!(config.text.xp_min, 15);
        assert_eq!(config.text.xp_max, 25);
        assert_eq!(config.text.cooldown_seconds, 60);
        assert_eq!(config.voice.min_members, 2);
        assert_eq!(config.voice.tick_interval_seconds, 15);
        assert_eq!(config.prestige.min_level, 100);
        assert_eq!(config.prestige.bonus_basis_points(), 500);
        assert_eq!(config.rewards.mode, RewardMode::Stack);
        assert!(config.notifications.level_up_channel.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = XpzConfig::from_toml(
            r#"
            [text]
            xp_min = 10
            exempt_channels = [42, 43]

            [rewards]
            mode = "highest_only"
            roles = [{ level = 5, role = 900 }, { level = 10, role = 901 }]
            "#,
        )
        .expect("parse");
        assert_eq!(config.text.xp_min, 10);
        assert_eq!(config.text.xp_max, 25);
        assert!(config.text.exempt_channels.contains(&ChannelId(42)));
        assert_eq!(config.rewards.mode, RewardMode::HighestOnly);
        assert_eq!(config.rewards.roles[1].role, RoleId(901));
    }

    #[test]
    fn inverted_text_range_is_rejected() {
        let err = XpzConfig::from_toml("[text]\nxp_min = 30\nxp_max = 20\n")
            .expect_err("should be rejected");
        assert!(matches!(err, XpzError::Config(_)));
    }

    #[test]
    fn duplicate_reward_levels_are_rejected() {
        let err = XpzConfig::from_toml(
            "[rewards]\nroles = [{ level = 5, role = 1 }, { level = 5, role = 2 }]\n",
        )
        .expect_err("should be rejected");
        assert!(err.to_string().contains("level 5"));
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        assert!(XpzConfig::from_toml("[voice]\ntick_interval_seconds = 0\n").is_err());
    }

    #[test]
    fn env_overlay() {
        let mut config = XpzConfig::default();
        config
            .apply_env_from(|name| match name {
                ENV_LEVEL_UP_CHANNEL => Some("123456789".into()),
                ENV_DATABASE_PATH => Some("/tmp/xp.sqlite".into()),
                _ => None,
            })
            .expect("overlay");
        assert_eq!(config.notifications.level_up_channel, Some(ChannelId(123_456_789)));
        assert_eq!(config.persistence.path, PathBuf::from("/tmp/xp.sqlite"));
    }

    #[test]
    fn env_overlay_rejects_garbage_channel() {
        let mut config = XpzConfig::default();
        let result = config.apply_env_from(|name| {
            (name == ENV_LEVEL_UP_CHANNEL).then(|| "general".to_string())
        });
        assert!(result.is_err());
    }
}
