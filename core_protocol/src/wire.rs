// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server-to-client packet shapes this core must produce (see §6 of the wire contract).
//! Encoding/encryption of the UDP datagram itself is the network layer's job; this module
//! only knows how to lay out the payload bytes the network layer is handed.

use crate::id::{Freq, PlayerId};

/// First byte of every packet below identifies its type to the client.
pub mod kind {
    pub const SCORE_UPDATE: u8 = 0x09;
    pub const GOAL: u8 = 0x17;
    pub const SCORE_RESET: u8 = 0x1A;
    pub const PERIODIC_REWARD: u8 = 0x23;
}

/// `0x09`: `{playerId:i16, killPoints:i32, flagPoints:i32, kills:u16, deaths:u16}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScoreUpdate {
    pub player_id: i16,
    pub kill_points: i32,
    pub flag_points: i32,
    pub kills: u16,
    pub deaths: u16,
}

impl ScoreUpdate {
    pub const LEN: usize = 1 + 2 + 4 + 4 + 2 + 2;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = kind::SCORE_UPDATE;
        out[1..3].copy_from_slice(&self.player_id.to_le_bytes());
        out[3..7].copy_from_slice(&self.kill_points.to_le_bytes());
        out[7..11].copy_from_slice(&self.flag_points.to_le_bytes());
        out[11..13].copy_from_slice(&self.kills.to_le_bytes());
        out[13..15].copy_from_slice(&self.deaths.to_le_bytes());
        out
    }
}

/// One entry of a `0x23` periodic reward packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PeriodicRewardItem {
    pub freq: Freq,
    pub points: i16,
}

/// `0x23`: header byte followed by N x `{freq:i16, points:i16}`; maximum payload 513 bytes total.
pub struct PeriodicReward;

impl PeriodicReward {
    /// Total bytes a packet may occupy, including the leading header byte.
    pub const MAX_PAYLOAD: usize = 513;
    pub const ITEM_LEN: usize = 4;
    /// How many items fit in one packet once the header byte is accounted for.
    pub const MAX_ITEMS_PER_PACKET: usize = (Self::MAX_PAYLOAD - 1) / Self::ITEM_LEN;

    /// Splits `items` into as many packets as are needed to respect [`Self::MAX_PAYLOAD`].
    /// Every packet carries the `0x23` header byte even when it is not the first fragment.
    pub fn fragment(items: &[PeriodicRewardItem]) -> Vec<Vec<u8>> {
        if items.is_empty() {
            return Vec::new();
        }
        items
            .chunks(Self::MAX_ITEMS_PER_PACKET)
            .map(|chunk| {
                let mut out = Vec::with_capacity(1 + chunk.len() * Self::ITEM_LEN);
                out.push(kind::PERIODIC_REWARD);
                for item in chunk {
                    out.extend_from_slice(&item.freq.0.to_le_bytes());
                    out.extend_from_slice(&item.points.to_le_bytes());
                }
                out
            })
            .collect()
    }
}

/// `0x17`: `{scoringFreq:i16, points:i32}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Goal {
    pub scoring_freq: Freq,
    pub points: i32,
}

impl Goal {
    pub const LEN: usize = 1 + 2 + 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = kind::GOAL;
        out[1..3].copy_from_slice(&self.scoring_freq.0.to_le_bytes());
        out[3..7].copy_from_slice(&self.points.to_le_bytes());
        out
    }
}

/// `0x1A`: `{playerId:i16}` where `-1` targets the whole arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScoreReset {
    pub player_id: i16,
}

impl ScoreReset {
    pub const LEN: usize = 1 + 2;
    pub const WHOLE_ARENA: i16 = -1;

    pub fn whole_arena() -> Self {
        Self {
            player_id: Self::WHOLE_ARENA,
        }
    }

    pub fn player(player_id: PlayerId) -> Self {
        Self {
            player_id: (player_id.0.get() & 0x7fff) as i16,
        }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = kind::SCORE_RESET;
        out[1..3].copy_from_slice(&self.player_id.to_le_bytes());
        out
    }
}

/// Fixed-layout personal-result packet emitted at the end of a speed game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeedStats {
    pub top5: arrayvec::ArrayVec<(PlayerId, i32), 5>,
    pub personal_rank: Option<u16>,
    pub personal_points: i32,
    pub personal_best: i32,
}
