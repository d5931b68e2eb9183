//! Studio model associations
//!
//! Models are not clipped; the model renderer only needs to know which
//! projectors land on an instance and which material or flashlight state to
//! draw it with.

use std::collections::HashMap;

use super::{ShadowHandle, ShadowManager};
use crate::foundation::math::Mat4;
use crate::render::{BindProxyId, FlashlightState, MaterialHandle, TextureId};
use crate::world::ModelInstanceId;

/// Two-way links between projectors and model instances
#[derive(Debug, Clone, Default)]
pub struct ModelShadowLinks {
    by_model: HashMap<ModelInstanceId, Vec<ShadowHandle>>,
    by_shadow: HashMap<ShadowHandle, Vec<ModelInstanceId>>,
}

impl ModelShadowLinks {
    /// Link a projector and a model; repeated links are ignored
    pub fn add(&mut self, shadow: ShadowHandle, model: ModelInstanceId) {
        let shadows = self.by_model.entry(model).or_default();
        if shadows.contains(&shadow) {
            return;
        }
        shadows.push(shadow);
        self.by_shadow.entry(shadow).or_default().push(model);
    }

    /// Unlink every projector from a model
    pub fn remove_model(&mut self, model: ModelInstanceId) {
        for shadow in self.by_model.remove(&model).unwrap_or_default() {
            if let Some(models) = self.by_shadow.get_mut(&shadow) {
                models.retain(|m| *m != model);
                if models.is_empty() {
                    self.by_shadow.remove(&shadow);
                }
            }
        }
    }

    /// Unlink every model from a projector
    pub fn remove_shadow(&mut self, shadow: ShadowHandle) {
        for model in self.by_shadow.remove(&shadow).unwrap_or_default() {
            if let Some(shadows) = self.by_model.get_mut(&model) {
                shadows.retain(|s| *s != shadow);
                if shadows.is_empty() {
                    self.by_model.remove(&model);
                }
            }
        }
    }

    /// Projectors on a model
    pub fn shadows_of(&self, model: ModelInstanceId) -> &[ShadowHandle] {
        self.by_model.get(&model).map_or(&[], Vec::as_slice)
    }

    /// Models a projector lands on
    pub fn models_of(&self, shadow: ShadowHandle) -> &[ModelInstanceId] {
        self.by_shadow.get(&shadow).map_or(&[], Vec::as_slice)
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.by_model.clear();
        self.by_shadow.clear();
    }
}

/// How one projector affects a model draw
#[derive(Debug, Clone, PartialEq)]
pub enum ModelShadowState {
    /// Draw the model again with the projector's model material
    Shadow {
        /// Projector
        handle: ShadowHandle,
        /// Material for the extra pass
        material: Option<MaterialHandle>,
        /// Proxy bound with it
        bind_proxy: Option<BindProxyId>,
    },
    /// Draw an additive flashlight pass
    Flashlight {
        /// Projector
        handle: ShadowHandle,
        /// Light parameters
        state: FlashlightState,
        /// World space to flashlight texture space
        world_to_shadow: Mat4,
        /// Shadow depth map
        depth_texture: Option<TextureId>,
    },
}

impl ShadowManager {
    /// Record that a projector lands on a model instance
    pub fn add_shadow_to_model(&mut self, handle: ShadowHandle, model: ModelInstanceId) {
        let Some(projector) = self.projectors.get(handle) else {
            debug_assert!(false, "invalid shadow {handle:?}");
            return;
        };
        if !projector.enabled {
            return;
        }
        if projector.is_flashlight() && !self.config.flashlight_render {
            return;
        }
        self.model_links.add(handle, model);
    }

    /// Forget every projector on a model instance
    pub fn remove_all_shadows_from_model(&mut self, model: ModelInstanceId) {
        self.model_links.remove_model(model);
    }

    /// Does any projector land on the model
    pub fn model_has_shadows(&self, model: ModelInstanceId) -> bool {
        !self.model_links.shadows_of(model).is_empty()
    }

    /// Render state for every projector on a model
    pub fn model_shadow_states(&self, model: ModelInstanceId) -> Vec<ModelShadowState> {
        self.model_links
            .shadows_of(model)
            .iter()
            .filter_map(|&handle| {
                let projector = self.projectors.get(handle)?;
                Some(match projector.flashlight() {
                    Some(flashlight) => ModelShadowState::Flashlight {
                        handle,
                        state: flashlight.state.clone(),
                        world_to_shadow: projector.info.world_to_shadow,
                        depth_texture: flashlight.depth_texture,
                    },
                    None => ModelShadowState::Shadow {
                        handle,
                        material: projector.model_material.clone(),
                        bind_proxy: projector.bind_proxy,
                    },
                })
            })
            .collect()
    }

    pub(crate) fn remove_all_models_from_shadow(&mut self, handle: ShadowHandle) {
        self.model_links.remove_shadow(handle);
    }
}
