// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Kill-reward advisor (§4.13): computes the point award for one kill from fixed reward,
//! flag bonuses, and team-kill policy.

/// Per-kill inputs the advisor needs. `killed_bounty` stands in for `Kill:FixedKillReward`'s
/// `-1` ("use victim's bounty") special case.
pub struct KillContext {
    pub killed_bounty: u16,
    pub flags_on_victim: u32,
    pub killer_carried_flags: u32,
    pub killer_team_owned_flags: u32,
    pub is_team_kill: bool,
}

/// `Kill:*` configuration consulted by [`compute_reward`].
pub struct KillPointsConfig {
    /// `-1` means "use the victim's bounty instead".
    pub fixed_kill_reward: i32,
    pub points_per_killed_flag: i32,
    pub points_per_carried_flag: i32,
    pub points_per_team_flag: i32,
    pub flag_minimum_bounty: u16,
    pub team_kill_points: bool,
}

/// Computes the kill-reward point total per §4.13. Team-kills return 0 unless
/// `Misc:TeamKillPoints` is set.
pub fn compute_reward(ctx: &KillContext, config: &KillPointsConfig) -> i32 {
    if ctx.is_team_kill && !config.team_kill_points {
        return 0;
    }

    let base = if config.fixed_kill_reward < 0 {
        ctx.killed_bounty as i32
    } else {
        config.fixed_kill_reward
    };

    let flag_bonus = if ctx.killed_bounty >= config.flag_minimum_bounty {
        config.points_per_killed_flag * ctx.flags_on_victim as i32
            + config.points_per_carried_flag * ctx.killer_carried_flags as i32
            + config.points_per_team_flag * ctx.killer_team_owned_flags as i32
    } else {
        0
    };

    base + flag_bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KillPointsConfig {
        KillPointsConfig {
            fixed_kill_reward: 10,
            points_per_killed_flag: 2,
            points_per_carried_flag: 1,
            points_per_team_flag: 1,
            flag_minimum_bounty: 0,
            team_kill_points: false,
        }
    }

    #[test]
    fn team_kill_yields_zero_unless_enabled() {
        let ctx = KillContext {
            killed_bounty: 100,
            flags_on_victim: 0,
            killer_carried_flags: 0,
            killer_team_owned_flags: 0,
            is_team_kill: true,
        };
        assert_eq!(compute_reward(&ctx, &config()), 0);

        let mut cfg = config();
        cfg.team_kill_points = true;
        assert_eq!(compute_reward(&ctx, &cfg), 10);
    }

    #[test]
    fn negative_fixed_reward_uses_victim_bounty() {
        let mut cfg = config();
        cfg.fixed_kill_reward = -1;
        let ctx = KillContext {
            killed_bounty: 250,
            flags_on_victim: 0,
            killer_carried_flags: 0,
            killer_team_owned_flags: 0,
            is_team_kill: false,
        };
        assert_eq!(compute_reward(&ctx, &cfg), 250);
    }

    #[test]
    fn flag_bonuses_add_when_bounty_meets_minimum() {
        let mut cfg = config();
        cfg.flag_minimum_bounty = 50;
        let ctx = KillContext {
            killed_bounty: 50,
            flags_on_victim: 2,
            killer_carried_flags: 1,
            killer_team_owned_flags: 3,
            is_team_kill: false,
        };
        // base 10 + 2*2 + 1*1 + 1*3 = 18
        assert_eq!(compute_reward(&ctx, &cfg), 18);
    }

    #[test]
    fn flag_bonuses_skipped_below_minimum_bounty() {
        let mut cfg = config();
        cfg.flag_minimum_bounty = 100;
        let ctx = KillContext {
            killed_bounty: 50,
            flags_on_victim: 5,
            killer_carried_flags: 5,
            killer_team_owned_flags: 5,
            is_team_kill: false,
        };
        assert_eq!(compute_reward(&ctx, &cfg), 10);
    }
}
