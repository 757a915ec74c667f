//! Surface state machine
//!
//! A [`Surface`] is the shell's view of one client window. It tracks the
//! lifecycle flags the UI cares about (live, ready, visible, focused,
//! closing), negotiates size and position with the window controller, pumps
//! client buffers into per-consumer textures, and forwards input.
//!
//! State is split over two locks. `ui` holds everything the UI thread owns.
//! `frames` holds the texture provider, the current size and the frame
//! dropper; it is taken from both the render path and the compositor path.
//! No method calls into the session or the window controller while holding
//! either lock.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::buffer::{GpuContext, NativeBuffer};
use crate::clock::{TimeSource, Timer};
use crate::config::SurfaceConfig;
use crate::error::Result;
use crate::geometry::{Point, Rect, Size};
use crate::input::{EventBuilder, Keymap};
use crate::logging::SURFACES;
use crate::session::{ApplicationHandle, Session};
use crate::signals::{EventSink, SurfaceSignal};
use crate::texture::{CompositorTextureProvider, ConsumerId};
use crate::window::{ExtraWindowInfo, ShellChrome, WindowId, WindowInfo, WindowState, WindowType};

mod delivery;
mod frames;

#[cfg(test)]
mod tests;

pub use delivery::PressedKey;

/// Identifies a UI view displaying a surface
pub type ViewId = u64;

/// The compositor-side surface a [`Surface`] wraps
pub trait CompositorSurface: Send + Sync {
    /// Buffers the client has submitted that `consumer` has not taken yet
    fn buffers_ready_for_compositor(&self, consumer: ConsumerId) -> u32;

    /// Takes the next ready buffer for `consumer`. Taking it tells the
    /// client the buffer was consumed.
    fn acquire_next_buffer(&self, consumer: ConsumerId) -> Option<Arc<dyn NativeBuffer>>;

    /// Compositor-side visibility, false while hidden
    fn visible(&self) -> bool;

    /// Whether the compositor currently considers the surface exposed
    fn is_exposed(&self) -> bool;

    fn set_exposed(&self, exposed: bool);

    fn set_keymap(&self, layout: &str, variant: &str) -> Result<()>;

    fn set_orientation(&self, orientation: Orientation);

    fn top_left(&self) -> Point;

    /// Top-left of the parent surface in display coordinates
    fn parent_top_left(&self) -> Option<Point>;

    fn is_confined_to_window(&self) -> bool;
}

/// Told when a client submits new buffers. Called on a compositor thread.
pub trait FrameObserver: Send + Sync {
    fn frames_posted(&self, window: WindowId);
}

/// Operations the shell can ask the window manager to perform on a window
pub trait WindowController: Send + Sync {
    fn request_close(&self, window: WindowId);
    fn force_close(&self, window: WindowId);
    fn resize(&self, window: WindowId, size: Size);
    fn move_to(&self, window: WindowId, top_left: Point);
    fn request_state(&self, window: WindowId, state: WindowState);
    fn activate(&self, window: WindowId);
    fn raise(&self, window: WindowId);
    fn deliver_keyboard_event(&self, window: WindowId, event: crate::input::KeyboardEvent);
    fn deliver_pointer_event(&self, window: WindowId, event: crate::input::PointerEvent);
    fn deliver_touch_event(&self, window: WindowId, event: crate::input::TouchEvent);
}

/// Output orientation as understood by the compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Normal,
    Right,
    Inverted,
    Left,
}

impl Orientation {
    /// Maps a rotation in degrees; only right angles are supported
    pub fn from_angle(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Orientation::Normal),
            90 => Some(Orientation::Right),
            180 => Some(Orientation::Inverted),
            270 => Some(Orientation::Left),
            _ => None,
        }
    }
}

/// Cursor shapes the UI knows how to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorShape {
    Arrow,
    UpArrow,
    Cross,
    Wait,
    IBeam,
    SizeVer,
    SizeHor,
    SizeBDiag,
    SizeFDiag,
    SizeAll,
    Blank,
    SplitV,
    SplitH,
    PointingHand,
    Forbidden,
    WhatsThis,
    Busy,
    OpenHand,
    ClosedHand,
    DragCopy,
    DragMove,
    DragLink,
}

impl CursorShape {
    /// Maps CSS3 and xcursor theme names
    pub fn from_name(name: &str) -> Option<Self> {
        let shape = match name {
            "default" | "left_ptr" => CursorShape::Arrow,
            "up_arrow" => CursorShape::UpArrow,
            "crosshair" | "cross" => CursorShape::Cross,
            "wait" | "watch" => CursorShape::Wait,
            "text" | "xterm" => CursorShape::IBeam,
            "ns-resize" | "size_ver" => CursorShape::SizeVer,
            "ew-resize" | "size_hor" => CursorShape::SizeHor,
            "ne-resize" | "size_bdiag" => CursorShape::SizeBDiag,
            "se-resize" | "size_fdiag" => CursorShape::SizeFDiag,
            "move" | "size_all" => CursorShape::SizeAll,
            "none" | "blank" => CursorShape::Blank,
            "row-resize" | "split_v" => CursorShape::SplitV,
            "col-resize" | "split_h" => CursorShape::SplitH,
            "pointer" | "hand" => CursorShape::PointingHand,
            "forbidden" => CursorShape::Forbidden,
            "whats_this" => CursorShape::WhatsThis,
            "left_ptr_watch" => CursorShape::Busy,
            "grab" | "openhand" => CursorShape::OpenHand,
            "grabbing" | "closedhand" => CursorShape::ClosedHand,
            "dnd-copy" => CursorShape::DragCopy,
            "dnd-move" => CursorShape::DragMove,
            "dnd-link" => CursorShape::DragLink,
            _ => return None,
        };
        Some(shape)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingState {
    NotClosing,
    Closing,
    CloseOverdue,
}

/// Collaborators shared by every surface of a shell
#[derive(Clone)]
pub struct SurfaceContext {
    pub controller: Arc<dyn WindowController>,
    pub gpu: Arc<dyn GpuContext>,
    pub clock: Arc<dyn TimeSource>,
    pub input: Arc<EventBuilder>,
    pub events: EventSink,
    pub config: SurfaceConfig,
}

#[derive(Debug, Clone, Copy, Default)]
struct View {
    exposed: bool,
}

struct UiState {
    name: String,
    window_type: WindowType,
    min_size: Size,
    max_size: Size,
    width_increment: i32,
    height_increment: i32,
    position: Point,
    requested_position: Point,
    state: WindowState,
    shell_chrome: ShellChrome,
    orientation_angle: u32,
    live: bool,
    ready: bool,
    visible: bool,
    focused: bool,
    views: HashMap<ViewId, View>,
    actively_focused_views: HashSet<ViewId>,
    never_set_surface_focus: bool,
    closing_state: ClosingState,
    close_timer: Timer,
    pending_resize: Size,
    keymap: String,
    cursor: Option<CursorShape>,
    input_bounds: Rect,
    pressed_keys: Vec<PressedKey>,
    children: Vec<Arc<Surface>>,
}

struct FrameState {
    textures: CompositorTextureProvider,
    size: Size,
    size_pending_change: bool,
    frame_dropper: Timer,
}

/// Requested position meaning "none requested"
pub const UNSET_POSITION: Point = Point::new(i32::MIN, i32::MIN);

pub struct Surface {
    id: WindowId,
    extra: Arc<ExtraWindowInfo>,
    compositor: Arc<dyn CompositorSurface>,
    controller: Arc<dyn WindowController>,
    session: Option<Weak<Session>>,
    parent: Option<Weak<Surface>>,
    clock: Arc<dyn TimeSource>,
    input: Arc<EventBuilder>,
    events: EventSink,
    ui: Mutex<UiState>,
    frames: Mutex<FrameState>,
}

impl Surface {
    pub fn new(
        info: &WindowInfo,
        compositor: Arc<dyn CompositorSurface>,
        session: Option<&Arc<Session>>,
        parent: Option<&Arc<Surface>>,
        ctx: &SurfaceContext,
    ) -> Arc<Self> {
        let extra = info
            .extra
            .clone()
            .unwrap_or_else(|| Arc::new(ExtraWindowInfo::new(info.id.to_string())));
        let state = WindowState::from_compositor(info.state);

        info!(
            target: SURFACES,
            "{}: created (type={:?}, state={:?}, size={}x{}, parent={:?})",
            info.id,
            info.window_type,
            state,
            info.size.width,
            info.size.height,
            info.parent
        );

        let position = to_local(info.top_left, compositor.parent_top_left());

        let surface = Arc::new(Self {
            id: info.id,
            extra,
            compositor,
            controller: ctx.controller.clone(),
            session: session.map(Arc::downgrade),
            parent: parent.map(Arc::downgrade),
            clock: ctx.clock.clone(),
            input: ctx.input.clone(),
            events: ctx.events.clone(),
            ui: Mutex::new(UiState {
                name: info.name.clone(),
                window_type: info.window_type,
                min_size: info.min_size,
                max_size: info.max_size,
                width_increment: info.width_increment,
                height_increment: info.height_increment,
                position,
                requested_position: UNSET_POSITION,
                state,
                shell_chrome: info.shell_chrome,
                orientation_angle: 0,
                live: true,
                ready: false,
                visible: false,
                focused: false,
                views: HashMap::new(),
                actively_focused_views: HashSet::new(),
                never_set_surface_focus: true,
                closing_state: ClosingState::NotClosing,
                close_timer: Timer::single_shot(ctx.config.close_timeout()),
                pending_resize: Size::invalid(),
                keymap: String::new(),
                cursor: None,
                input_bounds: Rect::default(),
                pressed_keys: Vec::new(),
                children: Vec::new(),
            }),
            frames: Mutex::new(FrameState {
                textures: CompositorTextureProvider::new(ctx.gpu.clone()),
                size: info.size,
                size_pending_change: false,
                frame_dropper: Timer::periodic(ctx.config.frame_dropper_interval()),
            }),
        });

        if let Some(parent) = parent {
            parent.ui.lock().children.push(surface.clone());
        }

        surface
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn persistent_id(&self) -> String {
        self.extra.persistent_id()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.as_ref().and_then(Weak::upgrade)
    }

    pub fn parent(&self) -> Option<Arc<Surface>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<Surface>> {
        self.ui.lock().children.clone()
    }

    pub fn remove_child(&self, id: WindowId) {
        self.ui.lock().children.retain(|child| child.id != id);
    }

    fn application(&self) -> Option<Arc<dyn ApplicationHandle>> {
        self.session().and_then(|s| s.application())
    }

    /// Application id for diagnostics, falling back to the session name
    pub fn app_id(&self) -> String {
        match self.session() {
            Some(session) => match session.application() {
                Some(app) => app.app_id(),
                None => session.name(),
            },
            None => "-".to_string(),
        }
    }

    fn emit(&self, signal: SurfaceSignal) {
        self.events.surface(self.id, signal);
    }

    // Lifecycle

    pub fn live(&self) -> bool {
        self.ui.lock().live
    }

    pub fn set_live(&self, live: bool) {
        {
            let mut ui = self.ui.lock();
            if ui.live == live {
                return;
            }
            ui.live = live;
        }
        info!(target: SURFACES, "{}: live={}", self.id, live);
        self.emit(SurfaceSignal::LiveChanged(live));
    }

    pub fn is_ready(&self) -> bool {
        self.ui.lock().ready
    }

    /// Marks the surface as having drawn its first frame. Only the first
    /// call has any effect.
    pub fn set_ready(&self) {
        {
            let mut ui = self.ui.lock();
            if ui.ready {
                return;
            }
            ui.ready = true;
        }
        info!(target: SURFACES, "{}: ready", self.id);
        self.update_visible();
        self.emit(SurfaceSignal::Ready);
        self.update_exposure();

        if let Some(session) = self.session() {
            session.on_surface_ready(self.id);
        }
    }

    pub fn visible(&self) -> bool {
        self.ui.lock().visible
    }

    /// Recomputes visibility from readiness, state and the compositor
    pub fn update_visible(&self) {
        let compositor_visible = self.compositor.visible();
        let changed = {
            let mut ui = self.ui.lock();
            let visible = ui.ready && ui.state.is_shown() && compositor_visible;
            if ui.visible == visible {
                None
            } else {
                ui.visible = visible;
                Some(visible)
            }
        };
        if let Some(visible) = changed {
            self.emit(SurfaceSignal::VisibleChanged(visible));
        }
    }

    /// The compositor hid or showed the surface
    pub fn on_hidden_changed(&self) {
        self.update_visible();
    }

    pub fn state(&self) -> WindowState {
        self.ui.lock().state
    }

    /// The window manager changed the window's state
    pub fn update_state(&self, state: WindowState) {
        {
            let mut ui = self.ui.lock();
            if ui.state == state {
                return;
            }
            ui.state = state;
        }
        info!(target: SURFACES, "{}: state={:?}", self.id, state);
        self.emit(SurfaceSignal::StateChanged(state));
        self.update_visible();

        if let Some(session) = self.session() {
            session.on_surface_state_changed(self.id);
        }
    }

    pub fn request_state(&self, state: WindowState) {
        info!(target: SURFACES, "{}: request_state({:?})", self.id, state);
        self.controller.request_state(self.id, state);
    }

    // Closing

    pub fn closing_state(&self) -> ClosingState {
        self.ui.lock().closing_state
    }

    /// Asks the client to close. Repeated calls are ignored.
    pub fn close(&self) {
        {
            let mut ui = self.ui.lock();
            if ui.closing_state != ClosingState::NotClosing {
                return;
            }
            ui.closing_state = ClosingState::Closing;
            ui.close_timer.start(self.clock.now());
        }
        info!(target: SURFACES, "{}: close", self.id);
        self.emit(SurfaceSignal::CloseRequested);
        self.controller.request_close(self.id);
    }

    pub fn force_close(&self) {
        info!(target: SURFACES, "{}: force_close", self.id);
        self.controller.force_close(self.id);
    }

    pub fn close_timer_running(&self) -> bool {
        self.ui.lock().close_timer.is_running()
    }

    pub fn close_timer_starts(&self) -> u64 {
        self.ui.lock().close_timer.start_count()
    }

    /// The client did not honour a close request in time
    pub fn on_close_timed_out(&self) {
        let live = {
            let mut ui = self.ui.lock();
            if ui.closing_state != ClosingState::Closing {
                return;
            }
            ui.closing_state = ClosingState::CloseOverdue;
            ui.live
        };
        info!(target: SURFACES, "{}: close timed out", self.id);

        if !live {
            warn!(target: SURFACES, "{}: close timed out but the surface is not live", self.id);
            return;
        }

        match self.application() {
            Some(app) if app.is_closing() => {
                info!(
                    target: SURFACES,
                    "{}: application {} is already closing, not forcing it", self.id, app.app_id()
                );
            }
            Some(app) => {
                warn!(
                    target: SURFACES,
                    "{}: application {} ignored a request to close a window, terminating it",
                    self.id,
                    app.app_id()
                );
                app.terminate();
            }
            None => {
                warn!(target: SURFACES, "{}: force closing a surface without an application", self.id);
                self.controller.force_close(self.id);
            }
        }
    }

    /// A closed surface with no open child surfaces
    pub fn is_fully_closed(&self) -> bool {
        let (live, children) = {
            let ui = self.ui.lock();
            (ui.live, ui.children.clone())
        };
        !live && children.iter().all(|child| child.is_fully_closed())
    }

    /// Fires due timers. Called from the UI loop.
    pub fn poll_timers(&self, now: Instant) {
        let drop_due = self.frames.lock().frame_dropper.poll(now);
        if drop_due {
            self.drop_pending_buffer();
        }

        let close_due = self.ui.lock().close_timer.poll(now);
        if close_due {
            self.on_close_timed_out();
        }
    }

    // Geometry

    pub fn size(&self) -> Size {
        self.frames.lock().size
    }

    fn client_is_running(&self) -> bool {
        match self.session() {
            Some(session) => session.state().is_client_running(),
            None => true,
        }
    }

    /// Asks for a new size. Deferred while the client cannot act on it.
    pub fn resize(&self, width: i32, height: i32) {
        let requested = Size::new(width, height);
        if !self.client_is_running() {
            self.ui.lock().pending_resize = requested;
            return;
        }

        let old = {
            let mut frames = self.frames.lock();
            if frames.size == requested && !frames.size_pending_change {
                return;
            }
            frames.size_pending_change = true;
            frames.size
        };
        debug!(
            target: SURFACES,
            "{}: resize old ({},{}), new ({},{})", self.id, old.width, old.height, width, height
        );
        self.controller.resize(self.id, requested);
    }

    pub fn pending_resize(&self) -> Size {
        self.ui.lock().pending_resize
    }

    /// The owning session changed state
    pub fn on_session_state_changed(&self) {
        if !self.client_is_running() {
            return;
        }
        let pending = std::mem::replace(&mut self.ui.lock().pending_resize, Size::invalid());
        if pending.is_valid() {
            self.resize(pending.width, pending.height);
        }
    }

    /// Position relative to the parent surface
    pub fn position(&self) -> Point {
        self.ui.lock().position
    }

    /// The window moved to `display_position`
    pub fn set_position(&self, display_position: Point) {
        let local = to_local(display_position, self.compositor.parent_top_left());
        let children = {
            let mut ui = self.ui.lock();
            if ui.position == local {
                return;
            }
            ui.position = local;
            ui.children.clone()
        };
        self.emit(SurfaceSignal::PositionChanged(local));

        // Children that stayed put in display coordinates moved relative to us
        for child in children {
            child.update_position();
        }
    }

    pub fn update_position(&self) {
        self.set_position(self.compositor.top_left());
    }

    pub fn requested_position(&self) -> Point {
        self.ui.lock().requested_position
    }

    /// Asks to move the window to `position`, relative to the parent
    pub fn set_requested_position(&self, position: Point) {
        let live = {
            let mut ui = self.ui.lock();
            if ui.requested_position == position {
                return;
            }
            ui.requested_position = position;
            ui.live
        };
        debug!(target: SURFACES, "{}: requested position {:?}", self.id, position);
        self.emit(SurfaceSignal::RequestedPositionChanged(position));

        if live {
            let display = to_display(position, self.compositor.parent_top_left());
            self.controller.move_to(self.id, display);
        }
    }

    pub fn convert_display_to_local(&self, display: Point) -> Point {
        to_local(display, self.compositor.parent_top_left())
    }

    pub fn convert_local_to_display(&self, local: Point) -> Point {
        to_display(local, self.compositor.parent_top_left())
    }

    pub fn orientation_angle(&self) -> u32 {
        self.ui.lock().orientation_angle
    }

    pub fn set_orientation_angle(&self, degrees: u32) {
        let Some(orientation) = Orientation::from_angle(degrees) else {
            warn!(target: SURFACES, "{}: unsupported orientation angle {}", self.id, degrees);
            return;
        };
        {
            let mut ui = self.ui.lock();
            if ui.orientation_angle == degrees {
                return;
            }
            ui.orientation_angle = degrees;
        }
        self.compositor.set_orientation(orientation);
        self.emit(SurfaceSignal::OrientationAngleChanged(degrees));
    }

    // Window attributes reported by the compositor

    pub fn name(&self) -> String {
        self.ui.lock().name.clone()
    }

    pub fn on_name_changed(&self, name: &str) {
        {
            let mut ui = self.ui.lock();
            if ui.name == name {
                return;
            }
            ui.name = name.to_string();
        }
        self.emit(SurfaceSignal::NameChanged(name.to_string()));
    }

    pub fn window_type(&self) -> WindowType {
        self.ui.lock().window_type
    }

    pub fn on_type_changed(&self, window_type: WindowType) {
        {
            let mut ui = self.ui.lock();
            if ui.window_type == window_type {
                return;
            }
            ui.window_type = window_type;
        }
        debug!(target: SURFACES, "{}: type = {:?}", self.id, window_type);
        self.emit(SurfaceSignal::TypeChanged(window_type));
    }

    pub fn minimum_size(&self) -> Size {
        self.ui.lock().min_size
    }

    pub fn maximum_size(&self) -> Size {
        self.ui.lock().max_size
    }

    pub fn size_increments(&self) -> (i32, i32) {
        let ui = self.ui.lock();
        (ui.width_increment, ui.height_increment)
    }

    pub fn on_minimum_width_changed(&self, value: i32) {
        if update_field(&mut self.ui.lock().min_size.width, value) {
            self.emit(SurfaceSignal::MinimumWidthChanged(value));
        }
    }

    pub fn on_minimum_height_changed(&self, value: i32) {
        if update_field(&mut self.ui.lock().min_size.height, value) {
            self.emit(SurfaceSignal::MinimumHeightChanged(value));
        }
    }

    pub fn on_maximum_width_changed(&self, value: i32) {
        if update_field(&mut self.ui.lock().max_size.width, value) {
            self.emit(SurfaceSignal::MaximumWidthChanged(value));
        }
    }

    pub fn on_maximum_height_changed(&self, value: i32) {
        if update_field(&mut self.ui.lock().max_size.height, value) {
            self.emit(SurfaceSignal::MaximumHeightChanged(value));
        }
    }

    pub fn on_width_increment_changed(&self, value: i32) {
        if update_field(&mut self.ui.lock().width_increment, value) {
            self.emit(SurfaceSignal::WidthIncrementChanged(value));
        }
    }

    pub fn on_height_increment_changed(&self, value: i32) {
        if update_field(&mut self.ui.lock().height_increment, value) {
            self.emit(SurfaceSignal::HeightIncrementChanged(value));
        }
    }

    pub fn shell_chrome(&self) -> ShellChrome {
        self.ui.lock().shell_chrome
    }

    pub fn set_shell_chrome(&self, chrome: ShellChrome) {
        {
            let mut ui = self.ui.lock();
            if ui.shell_chrome == chrome {
                return;
            }
            ui.shell_chrome = chrome;
        }
        self.emit(SurfaceSignal::ShellChromeChanged(chrome));
    }

    pub fn cursor(&self) -> Option<CursorShape> {
        self.ui.lock().cursor
    }

    pub fn set_cursor(&self, cursor: Option<CursorShape>) {
        debug!(target: SURFACES, "{}: cursor {:?}", self.id, cursor);
        self.ui.lock().cursor = cursor;
        self.emit(SurfaceSignal::CursorChanged(cursor));
    }

    /// The client set a named cursor. Unknown names fall back to the arrow.
    pub fn on_named_cursor(&self, name: &str) {
        let shape = CursorShape::from_name(name).unwrap_or_else(|| {
            warn!(target: SURFACES, "{}: unrecognized cursor name {}", self.id, name);
            CursorShape::Arrow
        });
        self.set_cursor(Some(shape));
    }

    pub fn on_cursor_removed(&self) {
        self.set_cursor(None);
    }

    pub fn input_bounds(&self) -> Rect {
        self.ui.lock().input_bounds
    }

    pub fn set_input_bounds(&self, bounds: Rect) {
        {
            let mut ui = self.ui.lock();
            if ui.input_bounds == bounds {
                return;
            }
            ui.input_bounds = bounds;
        }
        debug!(target: SURFACES, "{}: input bounds {:?}", self.id, bounds);
        self.emit(SurfaceSignal::InputBoundsChanged(bounds));
    }

    /// Unset bounds accept input everywhere
    pub fn input_area_contains(&self, point: Point) -> bool {
        let bounds = self.ui.lock().input_bounds;
        bounds.is_null() || bounds.contains(point)
    }

    pub fn confines_pointer(&self) -> bool {
        self.compositor.is_confined_to_window()
    }

    pub fn allow_client_resize(&self) -> bool {
        self.extra.allow_client_resize()
    }

    pub fn set_allow_client_resize(&self, allow: bool) {
        if self.extra.allow_client_resize() != allow {
            self.extra.set_allow_client_resize(allow);
            self.emit(SurfaceSignal::AllowClientResizeChanged(allow));
        }
    }

    // Keymap

    pub fn keymap(&self) -> String {
        self.ui.lock().keymap.clone()
    }

    /// Sets the keymap as `"layout+variant"`
    pub fn set_keymap(&self, layout_plus_variant: &str) {
        {
            let mut ui = self.ui.lock();
            if ui.keymap == layout_plus_variant {
                return;
            }
            ui.keymap = layout_plus_variant.to_string();
        }
        info!(target: SURFACES, "{}: keymap {}", self.id, layout_plus_variant);
        self.emit(SurfaceSignal::KeymapChanged(layout_plus_variant.to_string()));
        self.apply_keymap(layout_plus_variant);
    }

    fn apply_keymap(&self, layout_plus_variant: &str) {
        let keymap = match Keymap::parse(layout_plus_variant) {
            Ok(keymap) => keymap,
            Err(_) => {
                warn!(target: SURFACES, "{}: setting a keymap with an empty layout is not supported", self.id);
                return;
            }
        };
        if let Err(e) = self.compositor.set_keymap(&keymap.layout, &keymap.variant) {
            warn!(target: SURFACES, "{}: setting keymap failed: {}", self.id, e);
        }
    }

    // Focus and activation

    pub fn focused(&self) -> bool {
        self.ui.lock().focused
    }

    /// The window manager gave or took keyboard focus
    pub fn set_focused(&self, focused: bool) {
        {
            let mut ui = self.ui.lock();
            if ui.focused == focused {
                return;
            }
            ui.focused = focused;
        }
        info!(target: SURFACES, "{}: focused={}", self.id, focused);
        self.emit(SurfaceSignal::FocusedChanged(focused));

        if let Some(session) = self.session() {
            session.on_surface_focus_changed(self.id, focused);
        }

        if focused {
            // The key-up for a key pressed before focus moved away went elsewhere
            self.release_all_pressed_keys();
        }
    }

    /// A client asked for its window to be raised
    pub fn request_focus(&self) {
        info!(target: SURFACES, "{}: request_focus", self.id);
        self.emit(SurfaceSignal::FocusRequested);
    }

    pub fn activate(&self) {
        info!(target: SURFACES, "{}: activate", self.id);
        if self.live() {
            self.controller.activate(self.id);
        }
    }

    pub fn raise(&self) {
        self.controller.raise(self.id);
    }

    pub fn active_focus(&self) -> bool {
        !self.ui.lock().actively_focused_views.is_empty()
    }

    pub fn set_view_active_focus(&self, view: ViewId, active: bool) {
        let (changed, before) = {
            let mut ui = self.ui.lock();
            let before = !ui.actively_focused_views.is_empty();
            if active && !ui.actively_focused_views.contains(&view) {
                ui.actively_focused_views.insert(view);
                (true, before)
            } else if !active && (ui.actively_focused_views.contains(&view) || ui.never_set_surface_focus) {
                ui.actively_focused_views.remove(&view);
                (true, before)
            } else {
                (false, before)
            }
        };
        if !changed {
            return;
        }
        let after = self.active_focus();
        if before != after {
            self.emit(SurfaceSignal::ActiveFocusChanged(after));
        }
        self.update_active_focus();
    }

    fn update_active_focus(&self) {
        let Some(session) = self.session() else {
            return;
        };
        if session.child_session_count() > 0 {
            info!(
                target: SURFACES,
                "{}: has child trusted session, ignoring focus change", self.id
            );
            return;
        }
        self.ui.lock().never_set_surface_focus = false;
    }

    // Views and exposure

    pub fn is_being_displayed(&self) -> bool {
        !self.ui.lock().views.is_empty()
    }

    pub fn register_view(&self, view: ViewId) {
        let count = {
            let mut ui = self.ui.lock();
            ui.views.insert(view, View::default());
            ui.views.len()
        };
        info!(target: SURFACES, "{}: register_view({}) after={}", self.id, view, count);
        if count == 1 {
            self.emit(SurfaceSignal::IsBeingDisplayedChanged(true));
        }
    }

    pub fn unregister_view(&self, view: ViewId) {
        let (removed, count) = {
            let mut ui = self.ui.lock();
            let removed = ui.views.remove(&view).is_some();
            (removed, ui.views.len())
        };
        info!(target: SURFACES, "{}: unregister_view({}) after={}", self.id, view, count);
        if removed && count == 0 {
            self.emit(SurfaceSignal::IsBeingDisplayedChanged(false));
        }
        self.update_exposure();
        self.set_view_active_focus(view, false);
    }

    pub fn set_view_exposure(&self, view: ViewId, exposed: bool) {
        {
            let mut ui = self.ui.lock();
            match ui.views.get_mut(&view) {
                Some(entry) => entry.exposed = exposed,
                None => return,
            }
        }
        self.update_exposure();
    }

    /// Tells the compositor whether any view shows the surface. Nothing is
    /// propagated before the first frame.
    fn update_exposure(&self) {
        let exposed = {
            let ui = self.ui.lock();
            if !ui.ready {
                return;
            }
            ui.views.values().any(|v| v.exposed)
        };
        if exposed != self.compositor.is_exposed() {
            info!(target: SURFACES, "{}: exposed={}", self.id, exposed);
            self.compositor.set_exposed(exposed);
        }
    }
}

fn update_field(field: &mut i32, value: i32) -> bool {
    if *field == value {
        false
    } else {
        *field = value;
        true
    }
}

fn to_local(display: Point, parent_top_left: Option<Point>) -> Point {
    match parent_top_left {
        Some(parent) => display - parent,
        None => display,
    }
}

fn to_display(local: Point, parent_top_left: Option<Point>) -> Point {
    match parent_top_left {
        Some(parent) => local + parent,
        None => local,
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        debug!(target: SURFACES, "{}: destroyed", self.id);
    }
}
