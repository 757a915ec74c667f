//! In-memory stand-ins for the compositor's primitives
//!
//! Every type here records what was done to it so tests and the demo can
//! inspect the traffic between the shell and the compositor.

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::{DirectTexture, GpuContext, NativeBuffer, PixelFormat, TextureSource};
use crate::error::{Result, ShellError};
use crate::geometry::{Point, Rect, Size};
use crate::logging::SCREENS;
use crate::input::{DeviceId, InputDevice, KeyboardEvent, PointerEvent, TouchEvent};
use crate::screens::{Display, DisplayBuffer, DisplayListener, OutputConfiguration, OutputId, ScreenWindow};
use crate::session::{ApplicationHandle, ClientSession, LifecycleState, PromptSessionId, PromptSessionManager};
use crate::storage::{DisplayConfigurationOptions, DisplayConfigurationStorage, DisplayId};
use crate::surface::{CompositorSurface, Orientation, WindowController};
use crate::texture::ConsumerId;
use crate::window::{WindowId, WindowState};

/// GL context that hands out texture names and counts calls
#[derive(Debug, Default)]
pub struct HeadlessGpu {
    next_texture: AtomicU32,
    generated: AtomicUsize,
    deleted: AtomicUsize,
    binds: AtomicUsize,
    unpack_resets: AtomicUsize,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self {
            next_texture: AtomicU32::new(1),
            ..Default::default()
        }
    }

    pub fn textures_generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn textures_deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn unpack_resets(&self) -> usize {
        self.unpack_resets.load(Ordering::SeqCst)
    }
}

impl GpuContext for HeadlessGpu {
    fn gen_texture(&self) -> u32 {
        self.generated.fetch_add(1, Ordering::SeqCst);
        self.next_texture.fetch_add(1, Ordering::SeqCst)
    }

    fn delete_texture(&self, _id: u32) {
        self.deleted.fetch_add(1, Ordering::SeqCst);
    }

    fn bind_texture(&self, _id: u32) {
        self.binds.fetch_add(1, Ordering::SeqCst);
    }

    fn reset_unpack_alignment(&self) {
        self.unpack_resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferKind {
    Direct,
    Source,
    Unsupported,
}

/// A client buffer living in plain memory
#[derive(Debug)]
pub struct HeadlessBuffer {
    kind: BufferKind,
    size: Size,
    format: PixelFormat,
    uploads: AtomicUsize,
    secured: AtomicUsize,
}

impl HeadlessBuffer {
    fn new(kind: BufferKind, size: Size, format: PixelFormat) -> Self {
        Self {
            kind,
            size,
            format,
            uploads: AtomicUsize::new(0),
            secured: AtomicUsize::new(0),
        }
    }

    /// A buffer that owns a texture it can bind
    pub fn direct(size: Size, format: PixelFormat) -> Self {
        Self::new(BufferKind::Direct, size, format)
    }

    /// A buffer that uploads into the bound texture
    pub fn source(size: Size, format: PixelFormat) -> Self {
        Self::new(BufferKind::Source, size, format)
    }

    /// A buffer GL cannot render
    pub fn unsupported(size: Size) -> Self {
        Self::new(BufferKind::Unsupported, size, PixelFormat::Invalid)
    }

    /// How often the contents went to the GPU
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn secure_count(&self) -> usize {
        self.secured.load(Ordering::SeqCst)
    }
}

impl DirectTexture for HeadlessBuffer {
    fn bind(&self) {
        self.uploads.fetch_add(1, Ordering::SeqCst);
    }
}

impl TextureSource for HeadlessBuffer {
    fn bind_to_texture(&self) {
        self.uploads.fetch_add(1, Ordering::SeqCst);
    }

    fn secure_for_render(&self) {
        self.secured.fetch_add(1, Ordering::SeqCst);
    }
}

impl NativeBuffer for HeadlessBuffer {
    fn size(&self) -> Size {
        self.size
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn as_direct_texture(&self) -> Option<&dyn DirectTexture> {
        match self.kind {
            BufferKind::Direct => Some(self),
            _ => None,
        }
    }

    fn as_texture_source(&self) -> Option<&dyn TextureSource> {
        match self.kind {
            BufferKind::Source => Some(self),
            _ => None,
        }
    }
}

struct SurfaceState {
    buffer_size: Size,
    posted: u64,
    cursors: HashMap<ConsumerId, u64>,
    acquired: usize,
    visible: bool,
    exposed: bool,
    keymap: Option<(String, String)>,
    fail_keymap: bool,
    orientation: Orientation,
    top_left: Point,
    parent_top_left: Option<Point>,
    confined: bool,
}

impl SurfaceState {
    /// A consumer seen for the first time starts at the newest frame
    fn cursor(&mut self, consumer: ConsumerId) -> &mut u64 {
        let start = self.posted.saturating_sub(1);
        self.cursors.entry(consumer).or_insert(start)
    }
}

/// Compositor surface whose client is driven by the caller
pub struct HeadlessSurface {
    state: Mutex<SurfaceState>,
}

impl HeadlessSurface {
    pub fn new(buffer_size: Size) -> Self {
        Self {
            state: Mutex::new(SurfaceState {
                buffer_size,
                posted: 0,
                cursors: HashMap::new(),
                acquired: 0,
                visible: true,
                exposed: false,
                keymap: None,
                fail_keymap: false,
                orientation: Orientation::Normal,
                top_left: Point::default(),
                parent_top_left: None,
                confined: false,
            }),
        }
    }

    /// The client submits one frame
    pub fn post_frame(&self) {
        self.state.lock().posted += 1;
    }

    pub fn frames_posted(&self) -> u64 {
        self.state.lock().posted
    }

    /// Buffers handed out to consumers so far
    pub fn acquired(&self) -> usize {
        self.state.lock().acquired
    }

    /// Size of buffers submitted from now on
    pub fn set_buffer_size(&self, size: Size) {
        self.state.lock().buffer_size = size;
    }

    pub fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
    }

    pub fn exposed(&self) -> bool {
        self.state.lock().exposed
    }

    pub fn keymap(&self) -> Option<(String, String)> {
        self.state.lock().keymap.clone()
    }

    /// Makes every following keymap change fail
    pub fn fail_keymaps(&self, fail: bool) {
        self.state.lock().fail_keymap = fail;
    }

    pub fn orientation(&self) -> Orientation {
        self.state.lock().orientation
    }

    pub fn set_top_left(&self, top_left: Point) {
        self.state.lock().top_left = top_left;
    }

    pub fn set_parent_top_left(&self, parent: Option<Point>) {
        self.state.lock().parent_top_left = parent;
    }

    pub fn set_confined(&self, confined: bool) {
        self.state.lock().confined = confined;
    }
}

impl CompositorSurface for HeadlessSurface {
    fn buffers_ready_for_compositor(&self, consumer: ConsumerId) -> u32 {
        let mut state = self.state.lock();
        let posted = state.posted;
        let cursor = *state.cursor(consumer);
        (posted - cursor).min(u64::from(u32::MAX)) as u32
    }

    fn acquire_next_buffer(&self, consumer: ConsumerId) -> Option<Arc<dyn NativeBuffer>> {
        let mut state = self.state.lock();
        if state.posted == 0 {
            return None;
        }
        let posted = state.posted;
        let cursor = state.cursor(consumer);
        if *cursor < posted {
            *cursor += 1;
        }
        state.acquired += 1;
        Some(Arc::new(HeadlessBuffer::direct(state.buffer_size, PixelFormat::Argb8888)))
    }

    fn visible(&self) -> bool {
        self.state.lock().visible
    }

    fn is_exposed(&self) -> bool {
        self.state.lock().exposed
    }

    fn set_exposed(&self, exposed: bool) {
        self.state.lock().exposed = exposed;
    }

    fn set_keymap(&self, layout: &str, variant: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_keymap {
            return Err(ShellError::Keymap(format!("{}+{}", layout, variant)));
        }
        state.keymap = Some((layout.to_string(), variant.to_string()));
        Ok(())
    }

    fn set_orientation(&self, orientation: Orientation) {
        self.state.lock().orientation = orientation;
    }

    fn top_left(&self) -> Point {
        self.state.lock().top_left
    }

    fn parent_top_left(&self) -> Option<Point> {
        self.state.lock().parent_top_left
    }

    fn is_confined_to_window(&self) -> bool {
        self.state.lock().confined
    }
}

/// One call made on a [`RecordingController`]
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCall {
    RequestClose(WindowId),
    ForceClose(WindowId),
    Resize(WindowId, Size),
    MoveTo(WindowId, Point),
    RequestState(WindowId, WindowState),
    Activate(WindowId),
    Raise(WindowId),
    Keyboard(WindowId, KeyboardEvent),
    Pointer(WindowId, PointerEvent),
    Touch(WindowId, TouchEvent),
}

/// Window controller that only records
#[derive(Debug, Default)]
pub struct RecordingController {
    calls: Mutex<Vec<ControllerCall>>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&ControllerCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: ControllerCall) {
        self.calls.lock().push(call);
    }
}

impl WindowController for RecordingController {
    fn request_close(&self, window: WindowId) {
        self.record(ControllerCall::RequestClose(window));
    }

    fn force_close(&self, window: WindowId) {
        self.record(ControllerCall::ForceClose(window));
    }

    fn resize(&self, window: WindowId, size: Size) {
        self.record(ControllerCall::Resize(window, size));
    }

    fn move_to(&self, window: WindowId, top_left: Point) {
        self.record(ControllerCall::MoveTo(window, top_left));
    }

    fn request_state(&self, window: WindowId, state: WindowState) {
        self.record(ControllerCall::RequestState(window, state));
    }

    fn activate(&self, window: WindowId) {
        self.record(ControllerCall::Activate(window));
    }

    fn raise(&self, window: WindowId) {
        self.record(ControllerCall::Raise(window));
    }

    fn deliver_keyboard_event(&self, window: WindowId, event: KeyboardEvent) {
        self.record(ControllerCall::Keyboard(window, event));
    }

    fn deliver_pointer_event(&self, window: WindowId, event: PointerEvent) {
        self.record(ControllerCall::Pointer(window, event));
    }

    fn deliver_touch_event(&self, window: WindowId, event: TouchEvent) {
        self.record(ControllerCall::Touch(window, event));
    }
}

struct DisplayState {
    outputs: Vec<OutputConfiguration>,
    next_buffer: u64,
}

/// Display with outputs plugged and unplugged by the caller. Stored options
/// are applied when an output is plugged.
pub struct HeadlessDisplay {
    state: Mutex<DisplayState>,
    storage: Box<dyn DisplayConfigurationStorage>,
}

impl HeadlessDisplay {
    pub fn new(storage: Box<dyn DisplayConfigurationStorage>) -> Self {
        Self {
            state: Mutex::new(DisplayState {
                outputs: Vec::new(),
                next_buffer: 1,
            }),
            storage,
        }
    }

    pub fn plug(&self, mut output: OutputConfiguration) {
        if let Some(options) = self.storage.load(DisplayId { output_id: output.id }) {
            debug!(target: SCREENS, "Restoring stored options for output {}", output.id);
            output.apply(&options);
        }
        let mut state = self.state.lock();
        state.outputs.retain(|o| o.id != output.id);
        state.outputs.push(output);
    }

    pub fn unplug(&self, id: OutputId) {
        self.state.lock().outputs.retain(|o| o.id != id);
    }

    /// Changes an output in place, as a mode switch on the hardware would
    pub fn update_output(&self, id: OutputId, f: impl FnOnce(&mut OutputConfiguration)) {
        if let Some(output) = self.state.lock().outputs.iter_mut().find(|o| o.id == id) {
            f(output);
        }
    }
}

impl Display for HeadlessDisplay {
    fn configuration(&self) -> Vec<OutputConfiguration> {
        self.state.lock().outputs.clone()
    }

    fn display_buffers(&self) -> Vec<DisplayBuffer> {
        let mut state = self.state.lock();
        let areas: Vec<Rect> = state
            .outputs
            .iter()
            .filter(|o| o.connected && o.used)
            .map(OutputConfiguration::geometry)
            .collect();
        areas
            .into_iter()
            .map(|view_area| {
                let id = state.next_buffer;
                state.next_buffer += 1;
                DisplayBuffer { id, view_area }
            })
            .collect()
    }

    fn configure_output(&self, id: OutputId, options: &DisplayConfigurationOptions) -> Result<()> {
        {
            let mut state = self.state.lock();
            let output = state
                .outputs
                .iter_mut()
                .find(|o| o.id == id)
                .ok_or_else(|| ShellError::Config(format!("no output {}", id)))?;
            output.apply(options);
        }
        self.storage.save(DisplayId { output_id: id }, options)
    }
}

/// Display listener that records the areas it was told about
#[derive(Debug, Default)]
pub struct RecordingDisplayListener {
    added: Mutex<Vec<Rect>>,
    removed: Mutex<Vec<Rect>>,
}

impl RecordingDisplayListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(&self) -> Vec<Rect> {
        self.added.lock().clone()
    }

    pub fn removed(&self) -> Vec<Rect> {
        self.removed.lock().clone()
    }
}

impl DisplayListener for RecordingDisplayListener {
    fn add_display(&self, area: Rect) {
        self.added.lock().push(area);
    }

    fn remove_display(&self, area: Rect) {
        self.removed.lock().push(area);
    }
}

/// A UI toplevel window
#[derive(Debug)]
pub struct HeadlessScreenWindow {
    id: u64,
    exposed: AtomicBool,
    hidden: AtomicUsize,
}

impl HeadlessScreenWindow {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            exposed: AtomicBool::new(false),
            hidden: AtomicUsize::new(0),
        }
    }

    pub fn hide_count(&self) -> usize {
        self.hidden.load(Ordering::SeqCst)
    }
}

impl ScreenWindow for HeadlessScreenWindow {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_exposed(&self) -> bool {
        self.exposed.load(Ordering::SeqCst)
    }

    fn set_exposed(&self, exposed: bool) {
        self.exposed.store(exposed, Ordering::SeqCst);
    }

    fn hide(&self) {
        self.exposed.store(false, Ordering::SeqCst);
        self.hidden.fetch_add(1, Ordering::SeqCst);
    }
}

/// Client connection that records lifecycle notifications
#[derive(Debug)]
pub struct HeadlessClient {
    name: String,
    pid: u32,
    lifecycle: Mutex<Vec<LifecycleState>>,
}

impl HeadlessClient {
    pub fn new(name: impl Into<String>, pid: u32) -> Self {
        Self {
            name: name.into(),
            pid,
            lifecycle: Mutex::new(Vec::new()),
        }
    }

    pub fn lifecycle(&self) -> Vec<LifecycleState> {
        self.lifecycle.lock().clone()
    }
}

impl ClientSession for HeadlessClient {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn set_lifecycle_state(&self, state: LifecycleState) {
        self.lifecycle.lock().push(state);
    }
}

/// Application whose termination is only counted
#[derive(Debug)]
pub struct HeadlessApplication {
    app_id: String,
    closing: AtomicBool,
    terminated: AtomicUsize,
}

impl HeadlessApplication {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            closing: AtomicBool::new(false),
            terminated: AtomicUsize::new(0),
        }
    }

    pub fn set_closing(&self, closing: bool) {
        self.closing.store(closing, Ordering::SeqCst);
    }

    pub fn terminate_count(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl ApplicationHandle for HeadlessApplication {
    fn app_id(&self) -> String {
        self.app_id.clone()
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn terminate(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// What happened to a prompt session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptCall {
    Suspend(PromptSessionId),
    Resume(PromptSessionId),
    Stop(PromptSessionId),
}

#[derive(Debug, Default)]
pub struct HeadlessPromptSessions {
    calls: Mutex<Vec<PromptCall>>,
}

impl HeadlessPromptSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PromptCall> {
        self.calls.lock().clone()
    }
}

impl PromptSessionManager for HeadlessPromptSessions {
    fn suspend_prompt_session(&self, prompt: PromptSessionId) {
        self.calls.lock().push(PromptCall::Suspend(prompt));
    }

    fn resume_prompt_session(&self, prompt: PromptSessionId) {
        self.calls.lock().push(PromptCall::Resume(prompt));
    }

    fn stop_prompt_session(&self, prompt: PromptSessionId) {
        self.calls.lock().push(PromptCall::Stop(prompt));
    }
}

/// An alphanumeric keyboard
#[derive(Debug)]
pub struct HeadlessKeyboard {
    id: DeviceId,
    keymap: Mutex<Option<(String, String)>>,
}

impl HeadlessKeyboard {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            keymap: Mutex::new(None),
        }
    }

    pub fn keymap(&self) -> Option<(String, String)> {
        self.keymap.lock().clone()
    }
}

impl InputDevice for HeadlessKeyboard {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn name(&self) -> String {
        format!("headless-keyboard-{}", self.id)
    }

    fn is_keyboard(&self) -> bool {
        true
    }

    fn is_alpha_numeric(&self) -> bool {
        true
    }

    fn apply_keymap(&self, layout: &str, variant: &str) -> Result<()> {
        *self.keymap.lock() = Some((layout.to_string(), variant.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_consumer_sees_latest_frame() {
        let surface = HeadlessSurface::new(Size::new(10, 10));
        assert_eq!(surface.buffers_ready_for_compositor(1), 0);
        assert!(surface.acquire_next_buffer(1).is_none());

        surface.post_frame();
        surface.post_frame();
        surface.post_frame();
        assert_eq!(surface.buffers_ready_for_compositor(2), 1);
        assert!(surface.acquire_next_buffer(2).is_some());
        assert_eq!(surface.buffers_ready_for_compositor(2), 0);
    }

    #[test]
    fn test_consumers_advance_independently() {
        let surface = HeadlessSurface::new(Size::new(10, 10));
        assert_eq!(surface.buffers_ready_for_compositor(1), 0);
        surface.post_frame();
        surface.post_frame();

        assert_eq!(surface.buffers_ready_for_compositor(1), 2);
        surface.acquire_next_buffer(1);
        assert_eq!(surface.buffers_ready_for_compositor(1), 1);
        assert_eq!(surface.buffers_ready_for_compositor(2), 1);
        assert_eq!(surface.acquired(), 1);
    }

    #[test]
    fn test_display_applies_stored_options_on_plug() {
        let dir = tempfile::tempdir().unwrap();
        let storage = crate::storage::JsonFileStorage::open(dir.path().join("d.json")).unwrap();
        let options = DisplayConfigurationOptions {
            scale: Some(2.0),
            ..Default::default()
        };
        storage.save(DisplayId { output_id: 7 }, &options).unwrap();

        let display = HeadlessDisplay::new(Box::new(storage));
        display.plug(OutputConfiguration::new(7, "HDMI-1", Size::new(1920, 1080)));
        assert_eq!(display.configuration()[0].scale, 2.0);
    }

    #[test]
    fn test_configure_missing_output_fails() {
        let display = HeadlessDisplay::new(Box::new(crate::storage::NullStorage));
        let result = display.configure_output(3, &DisplayConfigurationOptions::default());
        assert!(matches!(result, Err(ShellError::Config(_))));
    }
}
