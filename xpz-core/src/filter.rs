//! Anti-farm text filter.
//!
//! Decides whether a message earns XP. Checks run in a fixed order and stop
//! at the first failure:
//!
//! 1. exempt channel
//! 2. award cooldown
//! 3. minimum normalized length
//! 4. emoji-only content (optional)
//! 5. duplicate of the previous message inside the dedup window
//! 6. rapid-fire after the previous message
//!
//! Only a duplicate and an award touch member state. A duplicate refreshes
//! `last_message_at` so repeated spam keeps the dedup window open; rapid-fire
//! leaves the record alone.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

use crate::config::TextXpConfig;
use crate::types::{ChannelId, MemberRecord, UnixSeconds};

static CUSTOM_EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<a?:\w+:\d+>").expect("custom emoji pattern compiles")
});

static PICTOGRAPHIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\p{Extended_Pictographic}\p{Emoji_Modifier}\p{Regional_Indicator}\x{FE0E}\x{FE0F}\x{200D}\x{20E3}]",
    )
    .expect("pictographic pattern compiles")
});

/// Why a message earned nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextRejection {
    /// The channel never earns text XP.
    ExemptChannel,
    /// The member was awarded text XP too recently.
    Cooldown {
        /// Seconds until the next award is possible.
        remaining: i64,
    },
    /// Normalized content is shorter than the minimum.
    TooShort {
        /// Normalized length in characters.
        length: usize,
    },
    /// Nothing but emoji and whitespace.
    OnlyEmojis,
    /// Same text as the previous message, inside the dedup window.
    Duplicate {
        /// The repeated normalized body.
        normalized: String,
    },
    /// Too soon after the previous considered message.
    RapidFire {
        /// Seconds since that message.
        since_last: i64,
    },
}

impl TextRejection {
    /// Short, stable label for logs and counters.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExemptChannel => "exempt_channel",
            Self::Cooldown { .. } => "cooldown",
            Self::TooShort { .. } => "too_short",
            Self::OnlyEmojis => "only_emojis",
            Self::Duplicate { .. } => "duplicate",
            Self::RapidFire { .. } => "rapid_fire",
        }
    }
}

/// Outcome of running a message through the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextVerdict {
    /// The message earns XP.
    Award {
        /// Normalized body to remember for dedup.
        normalized: String,
    },
    /// The message earns nothing.
    Reject(TextRejection),
}

impl TextVerdict {
    /// Apply the verdict's state changes to `record`.
    ///
    /// Returns `true` when the record changed and must be persisted.
    pub fn apply(&self, record: &mut MemberRecord, now: UnixSeconds) -> bool {
        match self {
            Self::Award { normalized } => {
                record.last_text_xp_at = now;
                record.last_message_at = now;
                record.last_message_normalized.clone_from(normalized);
                true
            }
            Self::Reject(TextRejection::Duplicate { normalized }) => {
                record.last_message_at = now;
                record.last_message_normalized.clone_from(normalized);
                true
            }
            Self::Reject(_) => false,
        }
    }

    /// Whether the message qualified.
    #[must_use]
    pub fn is_award(&self) -> bool {
        matches!(self, Self::Award { .. })
    }
}

/// Lowercase, collapse whitespace runs to one space, trim.
#[must_use]
pub fn normalize(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `true` when nothing but emoji (custom or Unicode) and whitespace remains.
#[must_use]
pub fn is_only_emojis(content: &str) -> bool {
    let without_custom = CUSTOM_EMOJI.replace_all(content, "");
    let without_pictographs = PICTOGRAPHIC.replace_all(&without_custom, "");
    without_pictographs.chars().all(char::is_whitespace)
}

/// Run the filter for a message in `channel` posted at `now`.
#[must_use]
pub fn evaluate(
    config: &TextXpConfig,
    record: &MemberRecord,
    channel: ChannelId,
    content: &str,
    now: UnixSeconds,
) -> TextVerdict {
    if config.exempt_channels.contains(&channel) {
        return TextVerdict::Reject(TextRejection::ExemptChannel);
    }

    let since_award = now.saturating_sub(record.last_text_xp_at);
    if since_award < config.cooldown_seconds {
        return TextVerdict::Reject(TextRejection::Cooldown {
            remaining: config.cooldown_seconds - since_award,
        });
    }

    let normalized = normalize(content);
    let length = normalized.chars().count();
    if length < config.min_length {
        return TextVerdict::Reject(TextRejection::TooShort { length });
    }

    if config.block_only_emojis && is_only_emojis(content) {
        return TextVerdict::Reject(TextRejection::OnlyEmojis);
    }

    let since_last = now.saturating_sub(record.last_message_at);
    if normalized == record.last_message_normalized
        && since_last <= config.duplicate_window_seconds
    {
        return TextVerdict::Reject(TextRejection::Duplicate { normalized });
    }

    if since_last <= config.rapid_window_seconds {
        return TextVerdict::Reject(TextRejection::RapidFire { since_last });
    }

    TextVerdict::Award { normalized }
}

/// Draw a text award uniformly from `[xp_min, xp_max]`.
pub fn roll_award<R: Rng>(config: &TextXpConfig, rng: &mut R) -> u32 {
    if config.xp_min >= config.xp_max {
        return config.xp_min;
    }
    rng.gen_range(config.xp_min..=config.xp_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommunityId, MemberId, MemberKey};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const NOW: UnixSeconds = 1_700_000_000;

    fn record() -> MemberRecord {
        MemberRecord::new(MemberKey::new(CommunityId(1), MemberId(2)))
    }

    fn eval(record: &MemberRecord, content: &str, now: UnixSeconds) -> TextVerdict {
        evaluate(&TextXpConfig::default(), record, ChannelId(10), content, now)
    }

    #[test]
    fn normalize_collapses_and_lowercases() {
        assert_eq!(normalize("  Hello \t\n  WORLD  "), "hello world");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn emoji_detection() {
        assert!(is_only_emojis("😀 🎉"));
        assert!(is_only_emojis("<:pepe:123456> <a:dance:987>"));
        assert!(is_only_emojis("👍🏽 ❤️ 👨‍👩‍👧 🇩🇪"));
        assert!(!is_only_emojis("nice 😀"));
        assert!(!is_only_emojis("<:pepe:123> ok"));
    }

    #[test]
    fn fresh_member_qualifies() {
        let verdict = eval(&record(), "Hello there, everyone", NOW);
        assert_eq!(
            verdict,
            TextVerdict::Award { normalized: "hello there, everyone".into() }
        );
    }

    #[test]
    fn five_characters_never_qualify() {
        let verdict = eval(&record(), "  abcde  ", NOW);
        assert_eq!(verdict, TextVerdict::Reject(TextRejection::TooShort { length: 5 }));
    }

    #[test]
    fn length_counts_scalar_values_not_utf16_units() {
        let config = TextXpConfig {
            block_only_emojis: false,
            ..TextXpConfig::default()
        };
        let five = evaluate(&config, &record(), ChannelId(1), "𝒽𝑒𝓁𝓁𝑜", NOW);
        assert_eq!(five, TextVerdict::Reject(TextRejection::TooShort { length: 5 }));

        let six = evaluate(&config, &record(), ChannelId(1), "𝒽𝑒𝓁𝓁𝑜𝓌", NOW);
        assert!(six.is_award());
    }

    #[test]
    fn exempt_channel_wins_over_everything() {
        let mut config = TextXpConfig::default();
        config.exempt_channels.insert(ChannelId(10));
        let verdict = evaluate(&config, &record(), ChannelId(10), "long enough text", NOW);
        assert_eq!(verdict, TextVerdict::Reject(TextRejection::ExemptChannel));
    }

    #[test]
    fn cooldown_blocks_second_award() {
        let mut rec = record();
        let first = eval(&rec, "first message here", NOW);
        assert!(first.apply(&mut rec, NOW));

        let second = eval(&rec, "a different message", NOW + 30);
        assert_eq!(second, TextVerdict::Reject(TextRejection::Cooldown { remaining: 30 }));

        let third = eval(&rec, "a different message", NOW + 60);
        assert!(third.is_award());
    }

    #[test]
    fn duplicate_refreshes_last_message_at() {
        let mut rec = record();
        rec.last_text_xp_at = NOW - 3600;
        rec.last_message_normalized = "same old message".into();
        rec.last_message_at = NOW - 10;

        let verdict = eval(&rec, "Same   OLD message", NOW);
        assert!(matches!(verdict, TextVerdict::Reject(TextRejection::Duplicate { .. })));
        assert!(verdict.apply(&mut rec, NOW));
        assert_eq!(rec.last_message_at, NOW);
        assert_eq!(rec.last_text_xp_at, NOW - 3600, "no award stamp on duplicates");
    }

    #[test]
    fn duplicate_outside_window_qualifies() {
        let mut rec = record();
        rec.last_message_normalized = "same old message".into();
        rec.last_message_at = NOW - 121;
        assert!(eval(&rec, "same old message", NOW).is_award());
    }

    #[test]
    fn rapid_fire_leaves_state_untouched() {
        let mut rec = record();
        rec.last_text_xp_at = NOW - 3600;
        rec.last_message_normalized = "earlier message".into();
        rec.last_message_at = NOW - 2;
        let before = rec.clone();

        let verdict = eval(&rec, "something brand new", NOW);
        assert_eq!(verdict, TextVerdict::Reject(TextRejection::RapidFire { since_last: 2 }));
        assert!(!verdict.apply(&mut rec, NOW));
        assert_eq!(rec, before);
    }

    #[test]
    fn emoji_only_rejected_when_enabled() {
        let verdict = eval(&record(), "😀😀😀😀😀😀", NOW);
        assert_eq!(verdict, TextVerdict::Reject(TextRejection::OnlyEmojis));

        let config = TextXpConfig { block_only_emojis: false, ..TextXpConfig::default() };
        let verdict = evaluate(&config, &record(), ChannelId(10), "😀😀😀😀😀😀", NOW);
        assert!(verdict.is_award());
    }

    #[test]
    fn roll_stays_in_range() {
        let config = TextXpConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let amount = roll_award(&config, &mut rng);
            assert!((15..=25).contains(&amount));
        }
    }
}
