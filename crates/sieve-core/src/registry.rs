//! Action type registry.
//!
//! Every action kind is described by one `static` [`ActionType`]. Actions
//! point at their descriptor, and the engine compares descriptors by address:
//! two actions are of the same kind only if they share the same `static`.
//! Names are for printing and lookup from plans, never for dispatch.

use crate::error::{Result, SieveError};
use bitflags::bitflags;
use std::fmt;
use std::sync::OnceLock;

bitflags! {
    /// Capabilities the transaction driver consults.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ActionFlags: u32 {
        /// The action tries to deliver the message somewhere.
        const TRIES_DELIVER = 1 << 0;
        /// The action sends mail to a third party.
        const SENDS_RESPONSE = 1 << 1;
    }
}

pub struct ActionType {
    pub name: &'static str,
    pub flags: ActionFlags,
    /// Maximum number of actions of this type in one result; 0 = unlimited.
    pub instance_limit: usize,
    pub description: &'static str,
}

impl ActionType {
    pub fn tries_deliver(&self) -> bool {
        self.flags.contains(ActionFlags::TRIES_DELIVER)
    }
}

impl PartialEq for ActionType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for ActionType {}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionType")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub struct SideEffectType {
    pub name: &'static str,
    pub description: &'static str,
}

impl PartialEq for SideEffectType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for SideEffectType {}

impl fmt::Debug for SideEffectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffectType")
            .field("name", &self.name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: Vec<&'static ActionType>,
    side_effects: Vec<&'static SideEffectType>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Registry holding the built-in actions and side effects.
    pub fn builtin() -> Self {
        Self {
            actions: crate::actions::BUILTIN_ACTIONS.to_vec(),
            side_effects: crate::actions::BUILTIN_SIDE_EFFECTS.to_vec(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&'static ActionType> {
        self.actions.iter().copied().find(|t| t.name == name)
    }

    pub fn get_side_effect(&self, name: &str) -> Option<&'static SideEffectType> {
        self.side_effects.iter().copied().find(|t| t.name == name)
    }

    pub fn contains(&self, action_type: &ActionType) -> bool {
        self.actions.iter().any(|t| *t == action_type)
    }

    pub fn contains_side_effect(&self, side_effect_type: &SideEffectType) -> bool {
        self.side_effects.iter().any(|t| *t == side_effect_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static ActionType> + '_ {
        self.actions.iter().copied()
    }

    pub fn side_effects(&self) -> impl Iterator<Item = &'static SideEffectType> + '_ {
        self.side_effects.iter().copied()
    }
}

#[derive(Debug, Default)]
pub struct ActionRegistryBuilder {
    registry: ActionRegistry,
}

impl ActionRegistryBuilder {
    /// Start from the built-in set, for hosts that add their own kinds.
    pub fn with_builtins() -> Self {
        Self {
            registry: ActionRegistry::builtin(),
        }
    }

    /// Add an action type. Registering the same descriptor twice is a no-op;
    /// a different descriptor under an existing name is an error.
    pub fn action(mut self, action_type: &'static ActionType) -> Result<Self> {
        if let Some(existing) = self.registry.get(action_type.name) {
            if existing == action_type {
                return Ok(self);
            }
            return Err(SieveError::DuplicateActionType(action_type.name.to_string()));
        }
        self.registry.actions.push(action_type);
        Ok(self)
    }

    pub fn side_effect(mut self, side_effect_type: &'static SideEffectType) -> Result<Self> {
        if let Some(existing) = self.registry.get_side_effect(side_effect_type.name) {
            if existing == side_effect_type {
                return Ok(self);
            }
            return Err(SieveError::DuplicateActionType(
                side_effect_type.name.to_string(),
            ));
        }
        self.registry.side_effects.push(side_effect_type);
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        self.registry
    }
}

// ---------------------------------------------------------------------------
// Process-wide registry
// ---------------------------------------------------------------------------

static REGISTRY: OnceLock<ActionRegistry> = OnceLock::new();

/// Install the process-wide registry. Must happen before the first call to
/// [`global`]; afterwards the registry is read-only.
pub fn init(registry: ActionRegistry) -> Result<()> {
    REGISTRY
        .set(registry)
        .map_err(|_| SieveError::RegistryInitialized)
}

/// The process-wide registry, defaulting to the built-in set.
pub fn global() -> &'static ActionRegistry {
    REGISTRY.get_or_init(ActionRegistry::builtin)
}
