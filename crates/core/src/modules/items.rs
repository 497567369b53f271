//! Item browser catalog and spawn service
//!
//! The F7 browser lists a fixed catalog of item names known to this game
//! build. Picking one pushes the name onto a shared queue; this service
//! module drains the queue and feeds each name to the player inventory's
//! pickup method.

use std::sync::Arc;

use parking_lot::Mutex;

use grimoire_sdk::{Component, ForeignFn, GameObject};

use crate::foreign::Foreign;
use crate::locator::Locator;
use crate::memory;
use crate::modules::{Module, ModuleCx};

/// Seconds the cached inventory handle may serve requests before it must
/// re-resolve from the scene.
const REVERIFY_INTERVAL: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemGroup {
    Weapons,
    Tools,
    Keys,
    Electronics,
    Puzzle,
    Food,
}

impl ItemGroup {
    pub const ALL: [ItemGroup; 6] = [
        ItemGroup::Weapons,
        ItemGroup::Tools,
        ItemGroup::Keys,
        ItemGroup::Electronics,
        ItemGroup::Puzzle,
        ItemGroup::Food,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ItemGroup::Weapons => "Weapons",
            ItemGroup::Tools => "Tools",
            ItemGroup::Keys => "Keys",
            ItemGroup::Electronics => "Electronics",
            ItemGroup::Puzzle => "Puzzle",
            ItemGroup::Food => "Food",
        }
    }
}

pub struct ItemDef {
    /// Name the game's inventory code knows the item by.
    pub id: &'static str,
    pub label: &'static str,
    pub group: ItemGroup,
}

/// Items present in this game build, keyed by the names the inventory's
/// pickup method accepts.
pub const ITEM_CATALOG: &[ItemDef] = &[
    ItemDef { id: "Crossbow", label: "Crossbow", group: ItemGroup::Weapons },
    ItemDef { id: "Shotgun", label: "Shotgun", group: ItemGroup::Weapons },
    ItemDef { id: "PepperSpray", label: "Pepper Spray", group: ItemGroup::Weapons },
    ItemDef { id: "Syringe", label: "Syringe", group: ItemGroup::Weapons },
    ItemDef { id: "Baton", label: "Stun Baton", group: ItemGroup::Weapons },
    ItemDef { id: "Hammer", label: "Hammer", group: ItemGroup::Tools },
    ItemDef { id: "Wrench", label: "Wrench", group: ItemGroup::Tools },
    ItemDef { id: "Plier", label: "Pliers", group: ItemGroup::Tools },
    ItemDef { id: "Cutter", label: "Cutting Pliers", group: ItemGroup::Tools },
    ItemDef { id: "Screwdriver", label: "Screwdriver", group: ItemGroup::Tools },
    ItemDef { id: "PadlockKey", label: "Padlock Key", group: ItemGroup::Keys },
    ItemDef { id: "SafeKey", label: "Safe Key", group: ItemGroup::Keys },
    ItemDef { id: "CarKey", label: "Car Key", group: ItemGroup::Keys },
    ItemDef { id: "MasterKey", label: "Master Key", group: ItemGroup::Keys },
    ItemDef { id: "SpecialKey", label: "Special Key", group: ItemGroup::Keys },
    ItemDef { id: "WeaponKey", label: "Weapon Key", group: ItemGroup::Keys },
    ItemDef { id: "WinchKey", label: "Winch Key", group: ItemGroup::Keys },
    ItemDef { id: "PlayhouseKey", label: "Playhouse Key", group: ItemGroup::Keys },
    ItemDef { id: "Battery", label: "Battery", group: ItemGroup::Electronics },
    ItemDef { id: "CarBattery", label: "Car Battery", group: ItemGroup::Electronics },
    ItemDef { id: "Remote", label: "Remote", group: ItemGroup::Electronics },
    ItemDef { id: "SparkPlug", label: "Spark Plug", group: ItemGroup::Electronics },
    ItemDef { id: "Fuse", label: "Fuse", group: ItemGroup::Electronics },
    ItemDef { id: "Melon", label: "Watermelon", group: ItemGroup::Puzzle },
    ItemDef { id: "Book", label: "Book", group: ItemGroup::Puzzle },
    ItemDef { id: "Winch", label: "Winch Handle", group: ItemGroup::Puzzle },
    ItemDef { id: "Wheel", label: "Wheel", group: ItemGroup::Puzzle },
    ItemDef { id: "Plank", label: "Plank", group: ItemGroup::Puzzle },
    ItemDef { id: "Teddy", label: "Teddy Bear", group: ItemGroup::Puzzle },
    ItemDef { id: "Gear1", label: "Gear 1", group: ItemGroup::Puzzle },
    ItemDef { id: "Gear2", label: "Gear 2", group: ItemGroup::Puzzle },
    ItemDef { id: "Meat", label: "Meat", group: ItemGroup::Food },
    ItemDef { id: "Gas", label: "Gas Can", group: ItemGroup::Food },
];

/// Queue the item browser pushes spawn requests onto.
#[derive(Clone, Default)]
pub struct SpawnRequests(Arc<Mutex<Vec<&'static str>>>);

impl SpawnRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: &'static str) {
        self.0.lock().push(id);
    }

    fn drain(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

pub struct ItemSpawner {
    requests: SpawnRequests,
    player: Locator<*mut GameObject>,
    inventory: Option<*mut Component>,
    pickup: Option<ForeignFn>,
    /// Time the inventory handle last came off a live player object.
    verified_at: f64,
}

// SAFETY: the cached handles are only touched from the render thread,
// under the pump mutex.
unsafe impl Send for ItemSpawner {}

impl ItemSpawner {
    pub fn new(requests: SpawnRequests) -> Self {
        ItemSpawner {
            requests,
            player: Locator::new("Player", &["FPSController"]),
            inventory: None,
            pickup: None,
            verified_at: f64::MIN,
        }
    }

    fn drop_handles(&mut self) {
        self.player.invalidate();
        self.inventory = None;
        self.pickup = None;
    }

    fn resolve(&mut self, api: &Foreign<'_>) -> Option<(*mut Component, ForeignFn)> {
        if let (Some(inventory), Some(pickup)) = (self.inventory, self.pickup) {
            return Some((inventory, pickup));
        }
        let player = self
            .player
            .get(|name| api.find_game_object(name).ok().flatten())?;
        let inventory = api.get_component(player, "Inventory").ok().flatten()?;
        let class = api.runtime().find_class("", "Inventory").ok()?;
        let pickup = api.runtime().method_pointer(class, "PickupItem", 1).ok()?;
        self.inventory = Some(inventory);
        self.pickup = Some(pickup);
        Some((inventory, pickup))
    }
}

impl Module for ItemSpawner {
    fn name(&self) -> &'static str {
        "ItemSpawner"
    }

    fn on_disable(&mut self, _cx: &mut ModuleCx<'_>) {
        self.drop_handles();
    }

    fn on_update(&mut self, cx: &mut ModuleCx<'_>) {
        if cx.time - self.verified_at >= REVERIFY_INTERVAL {
            // The pickup method pointer is a code address and stays valid;
            // only the inventory instance can go stale.
            self.inventory = None;
            self.verified_at = cx.time;
        }
        if self.requests.is_empty() {
            return;
        }
        let Some(runtime) = cx.runtime else {
            self.requests.drain();
            return;
        };
        let api = Foreign::new(runtime);
        let pending = self.requests.drain();
        let Some((inventory, pickup)) = self.resolve(&api) else {
            tracing::warn!("player inventory not found, spawn requests dropped");
            return;
        };
        for id in pending {
            let managed = runtime.new_string(id);
            if managed.is_null() {
                continue;
            }
            match unsafe { memory::call2::<_, _, ()>(pickup, inventory, managed) } {
                Ok(()) => tracing::info!(item = id, "item granted"),
                Err(e) => {
                    tracing::warn!(item = id, error = %e, "pickup call rejected");
                    self.drop_handles();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::{cx, NoKeys};

    #[test]
    fn test_catalog_groups_are_nonempty() {
        for group in ItemGroup::ALL {
            assert!(
                ITEM_CATALOG.iter().any(|i| i.group == group),
                "group {} has no items",
                group.label()
            );
        }
    }

    #[test]
    fn test_catalog_ids_are_unique() {
        let mut ids: Vec<&str> = ITEM_CATALOG.iter().map(|i| i.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ITEM_CATALOG.len());
    }

    #[test]
    fn test_requests_dropped_without_runtime() {
        let keys = NoKeys;
        let mut cx = cx(&keys);
        let requests = SpawnRequests::new();
        let mut spawner = ItemSpawner::new(requests.clone());
        requests.push("Crossbow");
        spawner.on_update(&mut cx);
        assert!(requests.is_empty());
        assert!(spawner.inventory.is_none());
    }

    #[test]
    fn test_inventory_handle_expires_after_reverify_interval() {
        let keys = NoKeys;
        let mut mcx = cx(&keys);
        let mut spawner = ItemSpawner::new(SpawnRequests::new());
        spawner.inventory = Some(0x10 as *mut Component);
        spawner.verified_at = 0.0;

        mcx.time = 1.0;
        spawner.on_update(&mut mcx);
        assert!(spawner.inventory.is_some(), "fresh handle is kept");

        mcx.time = REVERIFY_INTERVAL + 1.0;
        spawner.on_update(&mut mcx);
        assert!(spawner.inventory.is_none());
    }
}
