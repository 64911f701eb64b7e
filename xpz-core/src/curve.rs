//! Leveling curve: level to cumulative XP and back.
//!
//! Advancing from level `L` to `L + 1` costs
//!
//! ```text
//! xp_for_level(L) = 5L² + 50L + 100
//! ```
//!
//! so reaching level `L` from zero costs the closed-form sum
//!
//! ```text
//! total(L) = 5·(L−1)·L·(2L−1)/6 + 25·L·(L−1) + 100·L
//! ```
//!
//! `(L−1)·L·(2L−1)` is always divisible by 6, so the sum is exact in integer
//! arithmetic. All intermediate math runs in `u128`; public results saturate
//! at `u64::MAX`.

/// Per-level cost and cumulative position inside the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    /// XP earned since reaching the current level.
    pub within: u64,
    /// XP the current level spans (`xp_for_level(level)`).
    pub needed: u64,
}

/// XP required to advance from `level` to `level + 1`.
#[must_use]
pub fn xp_for_level(level: u32) -> u64 {
    let l = u128::from(level);
    saturate(5 * l * l + 50 * l + 100)
}

/// Cumulative XP required to reach `level` from zero.
#[must_use]
pub fn total_xp_for_level(level: u32) -> u64 {
    saturate(total_exact(u128::from(level)))
}

/// Largest level whose cumulative requirement does not exceed `total_xp`.
///
/// Agrees exactly with [`total_xp_for_level`]: for every level `L`,
/// `level_from_total_xp(total_xp_for_level(L)) == L`.
#[must_use]
pub fn level_from_total_xp(total_xp: u64) -> u32 {
    let xp = u128::from(total_xp);

    // total(L) > 5/3·L³, so cbrt(3x/5) is an upper bound within a few levels.
    let estimate = (total_xp as f64 * 0.6).cbrt().floor();
    let mut level: u128 = if estimate.is_finite() && estimate > 0.0 {
        estimate as u128
    } else {
        0
    };

    while total_exact(level) > xp {
        level -= 1;
    }
    while total_exact(level + 1) <= xp {
        level += 1;
    }
    u32::try_from(level).unwrap_or(u32::MAX)
}

/// Position of `xp` inside `level`.
///
/// `within` saturates at zero when the cached level is ahead of the XP (which
/// only happens after an administrative override).
#[must_use]
pub fn progress(xp: u64, level: u32) -> LevelProgress {
    let floor = total_xp_for_level(level);
    LevelProgress {
        within: xp.saturating_sub(floor),
        needed: xp_for_level(level),
    }
}

fn total_exact(level: u128) -> u128 {
    if level == 0 {
        return 0;
    }
    let l = level;
    5 * (l - 1) * l * (2 * l - 1) / 6 + 25 * l * (l - 1) + 100 * l
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_levels_match_direct_sums() {
        assert_eq!(xp_for_level(0), 100);
        assert_eq!(xp_for_level(1), 155);
        assert_eq!(xp_for_level(2), 220);
        assert_eq!(total_xp_for_level(0), 0);
        assert_eq!(total_xp_for_level(1), 100);
        assert_eq!(total_xp_for_level(2), 255);
        assert_eq!(total_xp_for_level(3), 475);
    }

    #[test]
    fn cumulative_sum_matches_iteration() {
        let mut running = 0u64;
        for level in 0..500 {
            assert_eq!(total_xp_for_level(level), running, "level {level}");
            running += xp_for_level(level);
        }
    }

    #[test]
    fn boundaries_are_exact() {
        assert_eq!(level_from_total_xp(0), 0);
        assert_eq!(level_from_total_xp(99), 0);
        assert_eq!(level_from_total_xp(100), 1);
        assert_eq!(level_from_total_xp(254), 1);
        assert_eq!(level_from_total_xp(255), 2);
        for level in 1..2_000 {
            let total = total_xp_for_level(level);
            assert_eq!(level_from_total_xp(total), level);
            assert_eq!(level_from_total_xp(total - 1), level - 1);
        }
    }

    #[test]
    fn prestige_threshold_level() {
        let total = total_xp_for_level(100);
        assert_eq!(level_from_total_xp(total), 100);
        assert_eq!(level_from_total_xp(total - 1), 99);
    }

    #[test]
    fn extreme_inputs_do_not_overflow() {
        let top = level_from_total_xp(u64::MAX);
        assert!(top > 2_000_000);
        assert!(total_xp_for_level(top + 1) > total_xp_for_level(top));
        assert_eq!(total_xp_for_level(u32::MAX), u64::MAX);
        assert_eq!(xp_for_level(u32::MAX), u64::MAX);
    }

    #[test]
    fn progress_inside_level() {
        let p = progress(300, 2);
        assert_eq!(p.within, 45);
        assert_eq!(p.needed, 220);

        let behind = progress(0, 3);
        assert_eq!(behind.within, 0);
    }
}
