//! Buffer pumping and the frame dropper
//!
//! A client can only have a few buffers in flight. If no render consumer
//! takes them, the client blocks in its swap. The frame dropper is a
//! periodic timer that consumes pending buffers on the consumers' behalf,
//! and stops itself once every consumer is caught up.

use log::debug;
use std::sync::Arc;

use super::{FrameState, Surface};
use crate::buffer::BufferTexture;
use crate::geometry::Size;
use crate::logging::SURFACES;
use crate::signals::SurfaceSignal;
use crate::texture::{CompositorTexture, CompositorTextureProvider, ConsumerId};

impl Surface {
    /// Texture for a render consumer, created on first use
    pub fn texture(&self, consumer: ConsumerId) -> Arc<BufferTexture> {
        self.frames.lock().textures.texture(consumer)
    }

    /// Texture for a render consumer without creating one
    pub fn weak_texture(&self, consumer: ConsumerId) -> Option<Arc<BufferTexture>> {
        self.frames
            .lock()
            .textures
            .compositor_texture_for_id(consumer)
            .and_then(|t| t.texture())
    }

    pub fn set_texture_provider(&self, provider: CompositorTextureProvider) {
        self.frames.lock().textures = provider;
    }

    pub fn num_buffers_ready_for_compositor(&self, consumer: ConsumerId) -> u32 {
        let _frames = self.frames.lock();
        self.compositor.buffers_ready_for_compositor(consumer)
    }

    pub fn current_frame_number(&self, consumer: ConsumerId) -> u64 {
        self.frames
            .lock()
            .textures
            .compositor_texture_for_id(consumer)
            .map(|t| t.frame())
            .unwrap_or(0)
    }

    /// Brings the consumer's texture up to date. Returns whether it holds a
    /// buffer to render.
    pub fn update_texture(&self, consumer: ConsumerId) -> bool {
        let mut guard = self.frames.lock();
        let frames = &mut *guard;
        let Some(compositor_texture) = frames.textures.compositor_texture_for_id(consumer) else {
            return false;
        };
        let Some(texture) = compositor_texture.texture() else {
            return false;
        };

        if compositor_texture.is_up_to_date() {
            return texture.has_buffer();
        }

        let ready = self.compositor.buffers_ready_for_compositor(consumer);
        if ready > 0 || !texture.has_buffer() {
            if let Some(buffer) = self.compositor.acquire_next_buffer(consumer) {
                // Never hold two client buffers at once
                texture.free_buffer();
                texture.set_buffer(buffer);
                compositor_texture.increment_frame();
                compositor_texture.set_up_to_date(true);
                let new_size = texture.texture_size();
                self.note_size(&mut frames.size, &mut frames.size_pending_change, new_size);
            }
        }

        if self.compositor.buffers_ready_for_compositor(consumer) > 0 {
            frames.frame_dropper.start(self.clock.now());
        }

        texture.has_buffer()
    }

    /// Consumes one pending buffer per consumer that has any. Stops the
    /// frame dropper once no consumer made progress.
    pub fn drop_pending_buffer(&self) {
        let mut guard = self.frames.lock();
        let frames = &mut *guard;
        let FrameState {
            textures,
            size,
            size_pending_change,
            frame_dropper,
        } = frames;

        let mut all_stop = true;
        let mut restart = false;

        textures.for_each_texture(|consumer, compositor_texture: &mut CompositorTexture| {
            if self.compositor.buffers_ready_for_compositor(consumer) == 0 {
                return;
            }

            compositor_texture.set_up_to_date(false);

            if let Some(buffer) = self.compositor.acquire_next_buffer(consumer) {
                all_stop = false;
                compositor_texture.increment_frame();

                // A consumer whose texture is gone still had its buffer taken
                if let Some(texture) = compositor_texture.texture() {
                    texture.free_buffer();
                    texture.set_buffer(buffer);
                    self.note_size(size, size_pending_change, texture.texture_size());
                    compositor_texture.set_up_to_date(true);

                    if self.compositor.buffers_ready_for_compositor(consumer) > 0 {
                        debug!(
                            target: SURFACES,
                            "{}: still buffers ready for compositor, restarting frame dropper", self.id
                        );
                        restart = true;
                    }
                }
            }
            self.emit(SurfaceSignal::FrameDropped);
        });

        if all_stop {
            // Nothing is queued, so the client cannot be blocked. Sleep until
            // it posts a frame again.
            frame_dropper.stop();
        } else if restart {
            frame_dropper.start(self.clock.now());
        }
    }

    fn note_size(&self, size: &mut Size, pending: &mut bool, new_size: Size) {
        if *size != new_size {
            *size = new_size;
            *pending = false;
            debug!(target: SURFACES, "{}: size changed to {}x{}", self.id, new_size.width, new_size.height);
            self.emit(SurfaceSignal::SizeChanged(new_size));
        }
    }

    /// The client posted new frames
    pub fn on_frames_posted(&self) {
        // Give the render consumers a full interval to pick them up
        self.frames.lock().frame_dropper.start(self.clock.now());
        self.emit(SurfaceSignal::FramesPosted);
    }

    /// The renderer swapped; every consumer needs a fresh buffer
    pub fn on_compositor_swapped_buffers(&self) {
        self.frames
            .lock()
            .textures
            .for_each_texture(|_, texture| texture.set_up_to_date(false));
    }

    pub fn start_frame_dropper(&self) {
        let mut frames = self.frames.lock();
        if !frames.frame_dropper.is_running() {
            frames.frame_dropper.start(self.clock.now());
        }
    }

    pub fn stop_frame_dropper(&self) {
        self.frames.lock().frame_dropper.stop();
    }

    pub fn frame_dropper_running(&self) -> bool {
        self.frames.lock().frame_dropper.is_running()
    }
}
