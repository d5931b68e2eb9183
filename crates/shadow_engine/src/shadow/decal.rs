//! Projector to surface associations
//!
//! Every decal sits on two doubly-linked lists at once: the owning
//! projector's list and the chain hanging off the target surface. Both lists
//! are threaded through the arena by handle so removal is O(1) from either
//! side.

use slotmap::SlotMap;

use super::vertex_cache::VertexCacheKey;
use super::{DecalHandle, ShadowHandle};
use crate::foundation::collections::PoolExhausted;
use crate::world::{DispShadowHandle, SurfaceId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Link {
    prev: Option<DecalHandle>,
    next: Option<DecalHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chain {
    Shadow,
    Surface,
}

/// One projector/surface association
#[derive(Debug, Clone)]
pub struct ShadowDecal {
    /// Owning projector
    pub shadow: ShadowHandle,
    /// Target surface
    pub surface: SurfaceId,
    /// Entry in the displacement's fragment store, for displacement surfaces
    pub disp_shadow: Option<DispShadowHandle>,
    pub(crate) geometry: Option<VertexCacheKey>,
    pub(crate) next_render: Option<DecalHandle>,
    shadow_link: Link,
    surface_link: Link,
}

impl ShadowDecal {
    /// Persistent geometry, when computed
    pub const fn geometry(&self) -> Option<VertexCacheKey> {
        self.geometry
    }

    const fn link(&self, chain: Chain) -> Link {
        match chain {
            Chain::Shadow => self.shadow_link,
            Chain::Surface => self.surface_link,
        }
    }

    fn link_mut(&mut self, chain: Chain) -> &mut Link {
        match chain {
            Chain::Shadow => &mut self.shadow_link,
            Chain::Surface => &mut self.surface_link,
        }
    }
}

/// Arena of decals plus the per-surface chain heads
#[derive(Debug, Clone)]
pub struct DecalArena {
    decals: SlotMap<DecalHandle, ShadowDecal>,
    surface_heads: Vec<Option<DecalHandle>>,
    capacity: usize,
}

fn push_front(
    decals: &mut SlotMap<DecalHandle, ShadowDecal>,
    head: &mut Option<DecalHandle>,
    handle: DecalHandle,
    chain: Chain,
) {
    if let Some(old) = *head {
        if let Some(decal) = decals.get_mut(old) {
            decal.link_mut(chain).prev = Some(handle);
        }
    }
    if let Some(decal) = decals.get_mut(handle) {
        *decal.link_mut(chain) = Link { prev: None, next: *head };
    }
    *head = Some(handle);
}

fn unlink(
    decals: &mut SlotMap<DecalHandle, ShadowDecal>,
    head: &mut Option<DecalHandle>,
    handle: DecalHandle,
    chain: Chain,
) {
    let Some(link) = decals.get(handle).map(|d| d.link(chain)) else {
        return;
    };
    match link.prev.and_then(|prev| decals.get_mut(prev)) {
        Some(prev) => prev.link_mut(chain).next = link.next,
        None => *head = link.next,
    }
    if let Some(next) = link.next.and_then(|next| decals.get_mut(next)) {
        next.link_mut(chain).prev = link.prev;
    }
}

impl DecalArena {
    /// Create an arena holding at most `capacity` decals
    pub fn new(capacity: usize) -> Self {
        Self {
            decals: SlotMap::with_key(),
            surface_heads: Vec::new(),
            capacity,
        }
    }

    /// Drop every decal and size the surface chain heads
    pub fn reset(&mut self, surface_count: usize) {
        self.decals.clear();
        self.surface_heads.clear();
        self.surface_heads.resize(surface_count, None);
    }

    /// Link a new decal at the head of both lists
    pub fn insert(
        &mut self,
        shadow_head: &mut Option<DecalHandle>,
        shadow: ShadowHandle,
        surface: SurfaceId,
    ) -> Result<DecalHandle, PoolExhausted> {
        if self.decals.len() >= self.capacity {
            return Err(PoolExhausted { capacity: self.capacity });
        }
        let Some(surface_head) = self.surface_heads.get_mut(surface.index()) else {
            return Err(PoolExhausted { capacity: self.surface_heads.len() });
        };
        let handle = self.decals.insert(ShadowDecal {
            shadow,
            surface,
            disp_shadow: None,
            geometry: None,
            next_render: None,
            shadow_link: Link::default(),
            surface_link: Link::default(),
        });
        push_front(&mut self.decals, shadow_head, handle, Chain::Shadow);
        push_front(&mut self.decals, surface_head, handle, Chain::Surface);
        Ok(handle)
    }

    /// Unlink a decal from both lists and free it
    pub fn remove(&mut self, shadow_head: &mut Option<DecalHandle>, handle: DecalHandle) -> Option<ShadowDecal> {
        let surface = self.decals.get(handle)?.surface;
        unlink(&mut self.decals, shadow_head, handle, Chain::Shadow);
        if let Some(surface_head) = self.surface_heads.get_mut(surface.index()) {
            unlink(&mut self.decals, surface_head, handle, Chain::Surface);
        }
        self.decals.remove(handle)
    }

    /// Get a decal
    pub fn get(&self, handle: DecalHandle) -> Option<&ShadowDecal> {
        self.decals.get(handle)
    }

    /// Get a decal mutably
    pub fn get_mut(&mut self, handle: DecalHandle) -> Option<&mut ShadowDecal> {
        self.decals.get_mut(handle)
    }

    /// Decals hanging off a surface, newest first
    pub fn on_surface(&self, surface: SurfaceId) -> impl Iterator<Item = DecalHandle> + '_ {
        let head = self.surface_heads.get(surface.index()).copied().flatten();
        std::iter::successors(head, move |h| self.decals.get(*h).and_then(|d| d.surface_link.next))
    }

    /// Decals of a projector list starting at `head`, newest first
    pub fn of_shadow(&self, head: Option<DecalHandle>) -> impl Iterator<Item = DecalHandle> + '_ {
        std::iter::successors(head, move |h| self.decals.get(*h).and_then(|d| d.shadow_link.next))
    }

    /// Number of live decals
    pub fn len(&self) -> usize {
        self.decals.len()
    }

    /// True when no decal exists
    pub fn is_empty(&self) -> bool {
        self.decals.is_empty()
    }

    /// Number of surfaces the chain heads were sized for
    pub fn surface_count(&self) -> usize {
        self.surface_heads.len()
    }
}
