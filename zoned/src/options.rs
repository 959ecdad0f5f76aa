// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use log::LevelFilter;
use structopt::StructOpt;

/// Zone server process options.
#[derive(Debug, StructOpt)]
pub struct Options {
    /// Arena created at startup, in addition to whatever the selection flow creates lazily.
    #[structopt(long, default_value = "public")]
    pub default_arena: String,

    /// Worker pool thread count (blocking persist/config I/O). Defaults to the number of
    /// logical CPUs.
    #[structopt(long)]
    pub worker_threads: Option<usize>,

    /// Log core/broker/lifecycle diagnostics.
    #[cfg_attr(debug_assertions, structopt(long, default_value = "info"))]
    #[cfg_attr(not(debug_assertions), structopt(long, default_value = "warn"))]
    pub debug_core: LevelFilter,

    /// Log rules-module diagnostics (freq manager, ball/flag/koth/speed/periodic).
    #[cfg_attr(debug_assertions, structopt(long, default_value = "info"))]
    #[cfg_attr(not(debug_assertions), structopt(long, default_value = "warn"))]
    pub debug_rules: LevelFilter,

    /// Log stats/persist diagnostics.
    #[cfg_attr(debug_assertions, structopt(long, default_value = "info"))]
    #[cfg_attr(not(debug_assertions), structopt(long, default_value = "warn"))]
    pub debug_stats: LevelFilter,
}
