//! Built-in action kinds.

pub mod discard;
pub mod flags;
pub mod notify;
pub mod store;

use crate::registry::{ActionType, SideEffectType};

/// Action types registered by [`ActionRegistry::builtin`](crate::registry::ActionRegistry::builtin).
pub static BUILTIN_ACTIONS: [&ActionType; 3] = [&store::STORE, &discard::DISCARD, &notify::NOTIFY];

pub static BUILTIN_SIDE_EFFECTS: [&SideEffectType; 1] = [&flags::FLAGS];
