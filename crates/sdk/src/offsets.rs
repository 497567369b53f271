//! Per-game field offsets
//!
//! All raw offsets into game classes live here and nowhere else, so a host
//! update that shifts a layout is a one-file fix. Values come from the
//! decompiled game build this targets (granny-legacy v1.7.1) and are not
//! expected to survive other versions.

/// `EnemyController` class: `Grandpa` GameObject reference.
pub const ENEMY_CONTROLLER_GRANDPA: usize = 0x30;

/// `EnemyController` class: `Granny` GameObject reference.
pub const ENEMY_CONTROLLER_GRANNY: usize = 0x38;

/// `AI_Granny` class: perception/state booleans.
pub mod granny {
    pub const UNSEEN_PLAYER: usize = 0x100;
    pub const CAUGHT_PLAYER: usize = 0x158;
    pub const IS_ANGRY: usize = 0x15B;
    pub const IS_FOLLOWING_SOUND: usize = 0x15C;
    pub const IS_CHASING: usize = 0x15D;
    pub const PLAYER_CLOSE: usize = 0x190;
    pub const PLAYER_TOUCHED_RAY: usize = 0x230;
}

/// `AI_Grandpa` class: perception/state booleans.
pub mod grandpa {
    pub const UNSEEN_PLAYER: usize = 0x108;
    pub const IS_SHOOTING: usize = 0x94;
    pub const CAUGHT_PLAYER: usize = 0x1B0;
    pub const IS_ANGRY: usize = 0x1B3;
    pub const IS_FOLLOWING_SOUND: usize = 0x1B4;
    pub const IS_CHASING: usize = 0x1B5;
    pub const PLAYER_CLOSE: usize = 0x1E8;
    pub const PLAYER_TOUCHED_RAY: usize = 0x288;
}
