// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process entry point: wires the broker, arena manager, player registry, freq-manager
//! enforcer chain, stats store, and mainloop together, then runs the tick loop until a
//! shutdown is requested.

mod options;

use crate::options::Options;
use core_protocol::name::ArenaName;
use log::info;
use server_util::worker_pool::WorkerPool;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use zone_core::arena::{ArenaManager, ArenaModule};
use zone_core::broker::Broker;
use zone_core::config::{ConfigStore, MemoryConfigStore};
use zone_core::flag::FlagMode;
use zone_core::freq_manager::{FreqEnforcer, LegalShip, LockSpec, ShipChange};
use zone_core::jackpot::JackpotRegistry;
use zone_core::mainloop::Mainloop;
use zone_core::modules::{BallGameModule, FlagGameModule, KothModule, PeriodicRewardModule, SpeedGameModule};
use zone_core::persist::PersistBridge;
use zone_core::player::PlayerRegistry;
use zone_core::stats::StatsStore;

/// Process exit codes the startup supervisor distinguishes (§6): everything else is treated
/// as a general error.
#[derive(Copy, Clone, Debug)]
#[repr(i32)]
enum ExitCode {
    Shutdown = 0,
    Recycle = 1,
    GeneralError = 2,
    OutOfMemory = 3,
    ModuleConfigError = 4,
    ModuleLoadError = 5,
}

fn init_logging(options: &Options) {
    let mut logger = env_logger::builder();
    logger.format_timestamp(None);
    logger.filter_module(module_path!(), options.debug_core);
    logger.filter_module("zone_core::broker", options.debug_core);
    logger.filter_module("zone_core::lifecycle", options.debug_core);
    logger.filter_module("zone_core::arena", options.debug_core);
    logger.filter_module("zone_core::freq_manager", options.debug_rules);
    logger.filter_module("zone_core::ball", options.debug_rules);
    logger.filter_module("zone_core::flag", options.debug_rules);
    logger.filter_module("zone_core::koth", options.debug_rules);
    logger.filter_module("zone_core::speed", options.debug_rules);
    logger.filter_module("zone_core::periodic", options.debug_rules);
    logger.filter_module("zone_core::stats", options.debug_stats);
    logger.filter_module("zone_core::persist", options.debug_stats);
    logger.init();
}

fn run(options: Options) -> ExitCode {
    let global_broker = Broker::new_root();

    let config: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
    let _legal_ship_token = global_broker.register_advisor::<dyn FreqEnforcer>(Arc::new(LegalShip::new(Arc::clone(&config))));
    let _ship_change_token = global_broker.register_advisor::<dyn FreqEnforcer>(Arc::new(ShipChange::new(Arc::clone(&config))));
    let _lock_spec_token = global_broker.register_advisor::<dyn FreqEnforcer>(Arc::new(LockSpec));

    // Owned here so their lifetime spans the run; the UDP layer and command parser that
    // would drive them are external collaborators this core only defines contracts for.
    let players = Arc::new(PlayerRegistry::new());
    let stats = Arc::new(StatsStore::default());
    let _persist = PersistBridge::new();
    let jackpots = Arc::new(JackpotRegistry::new());
    let arenas = Arc::new(ArenaManager::new(Arc::clone(&global_broker)));

    let default_arena = ArenaName::new(&options.default_arena);
    let flag_mode = match config.get_i32(default_arena, "Flag:FlagMode", 0) {
        1 => FlagMode::OwnAllDropped,
        _ => FlagMode::CarryAll,
    };
    let flag_count = config.get_i32(default_arena, "Flag:FlagCount", 3).max(0) as usize;

    let flag_module = Arc::new(FlagGameModule::new(
        Arc::clone(&config),
        Arc::clone(&stats),
        Arc::clone(&players),
        Arc::clone(&jackpots),
        flag_mode,
        flag_count,
    ));
    let ball_module = Arc::new(BallGameModule::new(Arc::clone(&config), Arc::clone(&stats), Arc::clone(&players)));
    let koth_module = Arc::new(KothModule::new(Arc::clone(&config), Arc::clone(&stats), Arc::clone(&players), Arc::clone(&jackpots)));
    let speed_module = Arc::new(SpeedGameModule::new(Arc::clone(&config), Arc::clone(&stats), Arc::clone(&players)));
    let periodic_module = Arc::new(PeriodicRewardModule::new(Arc::clone(&config), Arc::clone(&stats), Arc::clone(&players), Some(flag_module.as_ref())));

    let arena_modules: Vec<Arc<dyn ArenaModule>> = vec![
        ball_module,
        flag_module,
        koth_module,
        speed_module,
        periodic_module,
    ];
    arenas.get_or_create(default_arena, &arena_modules);
    info!("created default arena {}", default_arena);

    let workers = WorkerPool::new(options.worker_threads);
    let mainloop = Mainloop::new(Arc::clone(&arenas), workers, arena_modules);

    mainloop.run(Duration::from_millis(10));
    ExitCode::Shutdown
}

fn main() {
    let options = Options::from_args();
    init_logging(&options);

    let exit_code = run(options);
    std::process::exit(exit_code as i32);
}
