//! Built-in ability behaviors.

use glam::Vec3;
use serde::Deserialize;

use super::ability::{AbilityBehavior, AbilityContext, AbilityError};
use crate::definition::AbilityDefinition;
use crate::projector::{EntityHandle, FakeEntity};

/// Does nothing. Useful for abilities that only carry data.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveBehavior;

impl PassiveBehavior {
    /// Catalog key.
    pub const KEY: &'static str = "passive";
}

impl AbilityBehavior for PassiveBehavior {
    fn on_tick(&mut self, _ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
        Ok(())
    }
}

fn default_entity() -> String {
    "armor_stand".to_string()
}

fn default_offset() -> [f32; 3] {
    [0.0, 2.0, 0.0]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectionParams {
    #[serde(default = "default_entity")]
    entity: String,
    #[serde(default = "default_offset")]
    offset: [f32; 3],
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            entity: default_entity(),
            offset: default_offset(),
        }
    }
}

/// Shows a fake entity above the player while the ability is active.
///
/// Parameters: `entity` (kind, default `"armor_stand"`) and `offset`
/// (`[x, y, z]` relative to the player, default `[0, 2, 0]`).
#[derive(Debug)]
pub struct ProjectionBehavior {
    kind: String,
    offset: Vec3,
    projected: Option<EntityHandle>,
}

impl ProjectionBehavior {
    /// Catalog key.
    pub const KEY: &'static str = "projection";

    /// Reads the behavior's parameters from `definition`.
    ///
    /// # Errors
    ///
    /// Returns [`AbilityError::Recoverable`] if the parameters are malformed.
    pub fn from_definition(definition: &AbilityDefinition) -> Result<Self, AbilityError> {
        let params = if definition.parameters.is_null() {
            ProjectionParams::default()
        } else {
            ProjectionParams::deserialize(&definition.parameters)
                .map_err(|e| AbilityError::Recoverable(e.to_string()))?
        };
        Ok(Self {
            kind: params.entity,
            offset: Vec3::from_array(params.offset),
            projected: None,
        })
    }

    /// The entity currently projected, if any.
    #[must_use]
    pub fn projected(&self) -> Option<EntityHandle> {
        self.projected
    }

    fn retract(&mut self, ctx: &mut AbilityContext<'_>) {
        if let Some(handle) = self.projected.take() {
            ctx.projector.despawn(handle);
        }
    }
}

impl AbilityBehavior for ProjectionBehavior {
    fn on_tick(&mut self, _ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
        Ok(())
    }

    fn on_activate(&mut self, ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
        self.retract(ctx);
        let entity = FakeEntity::new(&self.kind, ctx.location + self.offset).owned_by(ctx.player);
        self.projected = Some(ctx.projector.spawn(entity));
        Ok(())
    }

    fn on_deactivate(&mut self, ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
        self.retract(ctx);
        Ok(())
    }

    fn on_detach(&mut self, ctx: &mut AbilityContext<'_>) {
        self.retract(ctx);
    }
}
