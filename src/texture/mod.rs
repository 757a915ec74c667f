//! Compositor texture provider
//!
//! One surface can be rendered by several consumers at once (one per view or
//! output). Each consumer gets its own [`BufferTexture`] and its own
//! freshness bookkeeping. The provider only keeps weak references: a texture
//! lives exactly as long as the render item holding it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::buffer::{BufferTexture, GpuContext};

/// Identifies a render consumer of a surface
pub type ConsumerId = u64;

/// Per-consumer freshness state
#[derive(Debug)]
pub struct CompositorTexture {
    up_to_date: bool,
    frame: u64,
    texture: Weak<BufferTexture>,
}

impl CompositorTexture {
    fn new(texture: &Arc<BufferTexture>) -> Self {
        Self {
            up_to_date: false,
            frame: 0,
            texture: Arc::downgrade(texture),
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    pub fn set_up_to_date(&mut self, up_to_date: bool) {
        self.up_to_date = up_to_date;
    }

    /// Number of buffers pulled for this consumer so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn increment_frame(&mut self) {
        self.frame += 1;
    }

    /// The texture, if its render item still exists
    pub fn texture(&self) -> Option<Arc<BufferTexture>> {
        self.texture.upgrade()
    }
}

/// Per-consumer cache of textures for one surface
pub struct CompositorTextureProvider {
    gpu: Arc<dyn GpuContext>,
    textures: HashMap<ConsumerId, CompositorTexture>,
}

impl CompositorTextureProvider {
    pub fn new(gpu: Arc<dyn GpuContext>) -> Self {
        Self {
            gpu,
            textures: HashMap::new(),
        }
    }

    /// Texture for `consumer`, created on first request or when the previous
    /// one has been dropped by its render item
    pub fn texture(&mut self, consumer: ConsumerId) -> Arc<BufferTexture> {
        self.reclaim_stale();

        if let Some(texture) = self.textures.get(&consumer).and_then(CompositorTexture::texture) {
            return texture;
        }

        let texture = Arc::new(BufferTexture::new(self.gpu.clone()));
        self.textures.insert(consumer, CompositorTexture::new(&texture));
        texture
    }

    pub fn compositor_texture_for_id(&mut self, consumer: ConsumerId) -> Option<&mut CompositorTexture> {
        self.textures.get_mut(&consumer)
    }

    pub fn for_each_texture<F>(&mut self, mut f: F)
    where
        F: FnMut(ConsumerId, &mut CompositorTexture),
    {
        for (consumer, texture) in self.textures.iter_mut() {
            f(*consumer, texture);
        }
    }

    /// Drops entries whose render item is gone. Returns how many were removed.
    pub fn reclaim_stale(&mut self) -> usize {
        let before = self.textures.len();
        self.textures.retain(|_, entry| entry.texture.strong_count() > 0);
        before - self.textures.len()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessGpu;

    fn provider() -> CompositorTextureProvider {
        CompositorTextureProvider::new(Arc::new(HeadlessGpu::new()))
    }

    #[test]
    fn test_texture_is_shared_per_consumer() {
        let mut provider = provider();
        let a = provider.texture(1);
        let b = provider.texture(1);
        let c = provider.texture(2);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(provider.len(), 2);
    }

    #[test]
    fn test_entry_survives_while_held() {
        let mut provider = provider();
        let held = provider.texture(1);
        assert_eq!(provider.reclaim_stale(), 0);

        let entry = provider.compositor_texture_for_id(1).unwrap();
        entry.increment_frame();
        assert!(Arc::ptr_eq(&entry.texture().unwrap(), &held));
    }

    #[test]
    fn test_stale_entries_reclaimed_lazily() {
        let mut provider = provider();
        drop(provider.texture(1));
        let _kept = provider.texture(2);

        assert_eq!(provider.len(), 1);
        assert!(provider.compositor_texture_for_id(1).is_none());
    }

    #[test]
    fn test_dropped_texture_is_recreated() {
        let mut provider = provider();
        let first = provider.texture(5);
        provider.compositor_texture_for_id(5).unwrap().increment_frame();
        drop(first);

        let _second = provider.texture(5);
        let entry = provider.compositor_texture_for_id(5).unwrap();
        assert_eq!(entry.frame(), 0);
        assert!(!entry.is_up_to_date());
    }

    #[test]
    fn test_for_each_visits_every_consumer() {
        let mut provider = provider();
        let _a = provider.texture(1);
        let _b = provider.texture(2);

        provider.for_each_texture(|_, texture| texture.set_up_to_date(true));

        let mut seen = Vec::new();
        provider.for_each_texture(|id, texture| {
            assert!(texture.is_up_to_date());
            seen.push(id);
        });
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }
}
