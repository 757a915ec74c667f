//! Buffer/texture bridge
//!
//! Wraps the compositor's native graphics buffers so the render thread can
//! bind them as textures. A native buffer either exposes a texture it can
//! bind directly or only a texture source that uploads into the currently
//! bound texture. Which path a buffer takes is decided once, when it is
//! wrapped in a [`GpuBuffer`].
//!
//! [`BufferTexture`] is touched from two threads: the compositor side calls
//! `set_buffer`/`free_buffer`, the render side calls `bind`/`texture_id`.
//! All of its state sits behind one mutex.

use log::{debug, error};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, ShellError};
use crate::geometry::Size;
use crate::logging::SURFACES;


/// Pixel layouts a client buffer can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Invalid,
    Abgr8888,
    Xbgr8888,
    Argb8888,
    Xrgb8888,
    Bgr888,
    Rgb888,
    Rgb565,
}

impl PixelFormat {
    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Abgr8888 | PixelFormat::Argb8888)
    }
}

/// A buffer that owns a GPU texture and can bind it itself
pub trait DirectTexture: Send + Sync {
    fn bind(&self);
}

/// A buffer that uploads its contents into the currently bound texture
pub trait TextureSource: Send + Sync {
    fn bind_to_texture(&self);
    fn secure_for_render(&self);
}

/// A client buffer as handed out by the compositor
pub trait NativeBuffer: Send + Sync {
    fn size(&self) -> Size;
    fn pixel_format(&self) -> PixelFormat;

    fn as_direct_texture(&self) -> Option<&dyn DirectTexture> {
        None
    }

    fn as_texture_source(&self) -> Option<&dyn TextureSource> {
        None
    }
}

/// GL entry points the bridge needs from the render context
pub trait GpuContext: Send + Sync {
    fn gen_texture(&self) -> u32;
    fn delete_texture(&self, id: u32);
    fn bind_texture(&self, id: u32);
    /// Restores the unpack alignment the scene graph expects after a
    /// buffer upload changed it
    fn reset_unpack_alignment(&self);
}

/// How a wrapped buffer gets onto the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPath {
    DirectTexture,
    TextureSource,
}

/// A native buffer together with the bind path chosen for it
pub struct GpuBuffer {
    path: BindPath,
    native: Arc<dyn NativeBuffer>,
}

impl GpuBuffer {
    pub fn wrap(native: Arc<dyn NativeBuffer>) -> Self {
        let path = if native.as_direct_texture().is_some() {
            BindPath::DirectTexture
        } else {
            BindPath::TextureSource
        };
        debug!(target: SURFACES, "Wrapped buffer uses {:?}", path);
        Self { path, native }
    }

    pub fn path(&self) -> BindPath {
        self.path
    }

    pub fn size(&self) -> Size {
        self.native.size()
    }

    pub fn has_alpha_channel(&self) -> bool {
        self.native.pixel_format().has_alpha()
    }

    /// Binds the buffer into the texture currently bound on the context
    pub fn bind(&self) -> Result<()> {
        match self.path {
            BindPath::DirectTexture => {
                let texture = self.native.as_direct_texture().ok_or(ShellError::UnsupportedBuffer)?;
                texture.bind();
            }
            BindPath::TextureSource => {
                let source = self.native.as_texture_source().ok_or(ShellError::UnsupportedBuffer)?;
                source.bind_to_texture();
                source.secure_for_render();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("path", &self.path)
            .field("size", &self.native.size())
            .finish()
    }
}

#[derive(Debug, Default)]
struct TextureState {
    buffer: Option<GpuBuffer>,
    size: Size,
    texture_id: Option<u32>,
    needs_update: bool,
}

/// Scene-graph texture backed by at most one client buffer at a time
pub struct BufferTexture {
    gpu: Arc<dyn GpuContext>,
    state: Mutex<TextureState>,
}

impl BufferTexture {
    pub fn new(gpu: Arc<dyn GpuContext>) -> Self {
        Self {
            gpu,
            state: Mutex::new(TextureState::default()),
        }
    }

    /// Replaces the held buffer. The GPU texture is refreshed lazily.
    pub fn set_buffer(&self, buffer: Arc<dyn NativeBuffer>) {
        let wrapped = GpuBuffer::wrap(buffer);
        let mut state = self.state.lock();
        state.size = wrapped.size();
        state.buffer = Some(wrapped);
        state.needs_update = true;
    }

    /// Releases the held buffer back to the compositor
    pub fn free_buffer(&self) {
        let mut state = self.state.lock();
        state.buffer = None;
        state.size = Size::default();
    }

    pub fn has_buffer(&self) -> bool {
        self.state.lock().buffer.is_some()
    }

    /// Size of the held buffer, zero when there is none
    pub fn texture_size(&self) -> Size {
        self.state.lock().size
    }

    pub fn has_alpha_channel(&self) -> bool {
        self.state
            .lock()
            .buffer
            .as_ref()
            .map(GpuBuffer::has_alpha_channel)
            .unwrap_or(false)
    }

    pub fn bind_path(&self) -> Option<BindPath> {
        self.state.lock().buffer.as_ref().map(GpuBuffer::path)
    }

    /// GPU handle of the texture, uploading the held buffer first if it
    /// changed since the last upload
    pub fn texture_id(&self) -> Result<u32> {
        let mut state = self.state.lock();
        let id = self.ensure_texture(&mut state);
        if state.needs_update {
            if let Some(buffer) = &state.buffer {
                self.gpu.bind_texture(id);
                buffer.bind().inspect_err(|e| error!(target: SURFACES, "Texture upload failed: {}", e))?;
                self.gpu.reset_unpack_alignment();
                state.needs_update = false;
            }
        }
        Ok(id)
    }

    /// Binds the texture for rendering. Fails when no buffer is held or the
    /// buffer cannot be rendered with GL.
    pub fn bind(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.buffer.is_none() {
            return Err(ShellError::NoBuffer);
        }
        let id = self.ensure_texture(&mut state);
        self.gpu.bind_texture(id);
        if let Some(buffer) = &state.buffer {
            if let Err(e) = buffer.bind() {
                error!(target: SURFACES, "Cannot bind buffer: {}", e);
                return Err(e);
            }
        }
        self.gpu.reset_unpack_alignment();
        state.needs_update = false;
        Ok(())
    }

    fn ensure_texture(&self, state: &mut TextureState) -> u32 {
        match state.texture_id {
            Some(id) => id,
            None => {
                let id = self.gpu.gen_texture();
                state.texture_id = Some(id);
                id
            }
        }
    }
}

impl Drop for BufferTexture {
    fn drop(&mut self) {
        if let Some(id) = self.state.get_mut().texture_id.take() {
            self.gpu.delete_texture(id);
        }
    }
}

impl fmt::Debug for BufferTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferTexture").field("state", &*self.state.lock()).finish()
    }
}
