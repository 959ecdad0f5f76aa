// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ball-game scoring (§4.6): per-arena team scores, goal rewards, and win detection.

use core_protocol::id::Freq;

/// `Soccer:Mode`. The two-team modes use freq slots `0, 1`; the four-team variants use
/// `0..4`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SoccerMode {
    None,
    LeftRight,
    TopBottom,
    FourTeamQuadrant,
    FourTeamSide,
}

impl SoccerMode {
    pub fn team_count(self) -> usize {
        match self {
            SoccerMode::None => 0,
            SoccerMode::LeftRight | SoccerMode::TopBottom => 2,
            SoccerMode::FourTeamQuadrant | SoccerMode::FourTeamSide => 4,
        }
    }
}

pub struct SoccerConfig {
    pub mode: SoccerMode,
    /// `>= 0` selects steal mode with this many starting points per team; negative selects
    /// absolute mode.
    pub capture_points: i32,
    /// Negative means a fixed `|reward|` points; non-negative scales with player count.
    pub reward: i32,
    pub win_by: i32,
    pub min_players: u32,
    pub min_teams: u32,
    pub custom_game: bool,
}

impl SoccerConfig {
    pub fn is_steal_mode(&self) -> bool {
        self.capture_points >= 0
    }
}

/// A fixed-size array of 8 signed integers indexed by `freq mod 8` (§3).
#[derive(Copy, Clone, Debug, Default)]
pub struct TeamScores(pub [i32; 8]);

impl TeamScores {
    /// Renders the `?score` chat line: `freq:score` pairs for every nonzero-or-participating
    /// slot, in freq order.
    pub fn format_line(&self, team_count: usize) -> String {
        (0..team_count.min(8))
            .map(|i| format!("freq {}: {}", i, self.0[i]))
            .collect::<Vec<_>>()
            .join("  ")
    }
}

impl TeamScores {
    pub fn get(&self, freq: Freq) -> i32 {
        self.0[freq.score_index()]
    }

    pub fn set(&mut self, freq: Freq, value: i32) {
        self.0[freq.score_index()] = value.max(0);
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GoalOutcome {
    pub transferred: i32,
    /// True when a steal-mode goal found the owner freq already at zero: no transfer, no
    /// score change.
    pub is_null: bool,
}

#[derive(Default)]
pub struct BallGame {
    pub scores: TeamScores,
}

impl BallGame {
    /// `[3, 3, 0, ...]` for a two-team steal game with `CapturePoints=3`; `[0; 8]` for
    /// absolute mode.
    pub fn reset(config: &SoccerConfig) -> Self {
        let mut scores = TeamScores::default();
        if config.is_steal_mode() {
            for team in 0..config.mode.team_count().min(8) {
                scores.0[team] = config.capture_points;
            }
        }
        Self { scores }
    }

    /// Steal mode transfers one point from `owner_freq` to `scoring_freq`, or is a null goal
    /// if the owner already has zero. Absolute mode adds one to the scorer unconditionally.
    pub fn on_goal(&mut self, config: &SoccerConfig, scoring_freq: Freq, owner_freq: Option<Freq>) -> GoalOutcome {
        if config.is_steal_mode() {
            let Some(owner_freq) = owner_freq else {
                return GoalOutcome::default();
            };
            if owner_freq == scoring_freq {
                return GoalOutcome::default();
            }
            let owner_score = self.scores.get(owner_freq);
            if owner_score <= 0 {
                return GoalOutcome { transferred: 0, is_null: true };
            }
            self.scores.set(owner_freq, owner_score - 1);
            let scorer_score = self.scores.get(scoring_freq);
            self.scores.set(scoring_freq, scorer_score + 1);
            GoalOutcome { transferred: 1, is_null: false }
        } else {
            let scorer_score = self.scores.get(scoring_freq);
            self.scores.set(scoring_freq, scorer_score + 1);
            GoalOutcome { transferred: 1, is_null: false }
        }
    }

    /// Checks for a win after a goal. Returns the winning freq's score-array index, if any.
    pub fn check_win(&self, config: &SoccerConfig) -> Option<usize> {
        let team_count = config.mode.team_count();
        if team_count == 0 {
            return None;
        }
        if config.is_steal_mode() {
            match team_count {
                2 => {
                    let zero_team = (0..2).find(|&i| self.scores.0[i] == 0)?;
                    Some(1 - zero_team)
                }
                4 => {
                    let zero_count = (0..4).filter(|&i| self.scores.0[i] == 0).count();
                    if zero_count == 3 {
                        (0..4).find(|&i| self.scores.0[i] != 0)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        } else {
            let threshold = config.capture_points.unsigned_abs() as i32;
            (0..team_count).find(|&i| {
                let score = self.scores.0[i];
                score >= threshold
                    && (0..team_count)
                        .filter(|&j| j != i)
                        .all(|j| score - self.scores.0[j] >= config.win_by)
            })
        }
    }
}

/// `Reward < 0` is an absolute `|Reward|`; otherwise scales with `player_count^2`. Zeroed
/// when the min-players/min-teams gates fail, or when the scoring player is in a safe zone.
pub fn reward_points(
    config: &SoccerConfig,
    player_count: u32,
    participating_teams: u32,
    scorer_in_safe_zone: bool,
) -> i32 {
    if scorer_in_safe_zone {
        return 0;
    }
    if player_count < config.min_players || participating_teams < config.min_teams {
        return 0;
    }
    if config.reward < 0 {
        config.reward.unsigned_abs() as i32
    } else {
        ((player_count as i64).pow(2) * config.reward as i64 / 1000) as i32
    }
}

/// `?setscore a b c d e f g h`: absolute-scoring only, parses up to 8 integers, clamping
/// negatives to zero.
pub fn parse_setscore(args: &str) -> Option<[i32; 8]> {
    let mut out = [0i32; 8];
    let mut count = 0;
    for (i, token) in args.split_whitespace().enumerate().take(8) {
        out[i] = token.parse::<i32>().ok()?.max(0);
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_team_steal() -> SoccerConfig {
        SoccerConfig {
            mode: SoccerMode::LeftRight,
            capture_points: 3,
            reward: 10,
            win_by: 0,
            min_players: 0,
            min_teams: 0,
            custom_game: false,
        }
    }

    #[test]
    fn two_team_steal_soccer_win_scenario() {
        let config = two_team_steal();
        let mut game = BallGame::reset(&config);
        assert_eq!(game.scores.0, [3, 3, 0, 0, 0, 0, 0, 0]);

        for _ in 0..3 {
            let outcome = game.on_goal(&config, Freq(0), Some(Freq(1)));
            assert!(!outcome.is_null);
        }
        assert_eq!(game.scores.0[0], 6);
        assert_eq!(game.scores.0[1], 0);
        assert_eq!(game.check_win(&config), Some(0));
    }

    #[test]
    fn null_goal_when_owner_already_zero() {
        let config = two_team_steal();
        let mut game = BallGame::reset(&config);
        for _ in 0..3 {
            game.on_goal(&config, Freq(0), Some(Freq(1)));
        }
        let outcome = game.on_goal(&config, Freq(0), Some(Freq(1)));
        assert!(outcome.is_null);
        assert_eq!(outcome.transferred, 0);
    }

    #[test]
    fn four_team_steal_wins_when_three_at_zero() {
        let config = SoccerConfig {
            mode: SoccerMode::FourTeamQuadrant,
            capture_points: 1,
            ..two_team_steal()
        };
        let mut game = BallGame::reset(&config);
        game.on_goal(&config, Freq(0), Some(Freq(1)));
        game.on_goal(&config, Freq(0), Some(Freq(2)));
        game.on_goal(&config, Freq(0), Some(Freq(3)));
        assert_eq!(game.check_win(&config), Some(0));
    }

    #[test]
    fn absolute_mode_win_requires_win_by_margin() {
        let config = SoccerConfig {
            mode: SoccerMode::LeftRight,
            capture_points: -3,
            win_by: 2,
            ..two_team_steal()
        };
        let mut game = BallGame::reset(&config);
        game.on_goal(&config, Freq(0), None);
        game.on_goal(&config, Freq(0), None);
        game.on_goal(&config, Freq(1), None);
        assert_eq!(game.scores.0[0], 2);
        assert!(game.check_win(&config).is_none(), "margin of 1 < win_by 2");

        game.on_goal(&config, Freq(0), None);
        assert_eq!(game.check_win(&config), Some(0));
    }

    #[test]
    fn reward_zeroed_in_safe_zone() {
        let config = two_team_steal();
        assert_eq!(reward_points(&config, 10, 2, true), 0);
        assert!(reward_points(&config, 10, 2, false) > 0);
    }

    #[test]
    fn setscore_clamps_negatives() {
        let parsed = parse_setscore("5 -3 0").unwrap();
        assert_eq!(&parsed[..3], &[5, 0, 0]);
    }
}
