// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Contract to the (external) configuration store. Per §1 this core treats the config store
//! as a collaborator with a contract only; [`MemoryConfigStore`] is a minimal in-memory
//! implementation used by tests and by `zoned` until a real backing store is wired in.

use core_protocol::name::ArenaName;
use std::collections::HashMap;
use std::sync::RwLock;

/// Read access to per-arena and global configuration keys, e.g. `"Soccer:CapturePoints"`.
/// A missing key is a configuration error the caller resolves locally via a default, per §7.
pub trait ConfigStore: Send + Sync {
    fn get_str(&self, arena: ArenaName, key: &str) -> Option<String>;

    fn get_i32(&self, arena: ArenaName, key: &str, default: i32) -> i32 {
        self.get_str(arena, key)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, arena: ArenaName, key: &str, default: bool) -> bool {
        self.get_str(arena, key)
            .and_then(|s| match s.as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    /// A global key is stored under no particular arena; implementations key these however
    /// they like (e.g. a reserved arena name), so this is a separate method rather than an
    /// arena-optional signature.
    fn get_global_str(&self, key: &str) -> Option<String>;
}

/// A flat, in-memory configuration store. Per-arena keys are namespaced `"arena\x00key"`.
#[derive(Default)]
pub struct MemoryConfigStore {
    per_arena: RwLock<HashMap<(ArenaName, String), String>>,
    global: RwLock<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, arena: ArenaName, key: &str, value: impl Into<String>) {
        self.per_arena
            .write()
            .unwrap()
            .insert((arena, key.to_string()), value.into());
    }

    pub fn set_global(&self, key: &str, value: impl Into<String>) {
        self.global.write().unwrap().insert(key.to_string(), value.into());
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get_str(&self, arena: ArenaName, key: &str) -> Option<String> {
        self.per_arena
            .read()
            .unwrap()
            .get(&(arena, key.to_string()))
            .cloned()
    }

    fn get_global_str(&self, key: &str) -> Option<String> {
        self.global.read().unwrap().get(key).cloned()
    }
}
