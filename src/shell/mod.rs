//! UI-thread hub
//!
//! [`Shell`] owns the UI side of every client: one [`Session`] per
//! application and one [`Surface`] per window, plus the screens model. It
//! is only ever touched from the UI thread; compositor threads reach it by
//! posting tasks through [`UiHandle`].

use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::BufferTexture;
use crate::geometry::{Point, Rect};
use crate::input::{
    EventBuilder, EventInfo, HoverInput, HoverInputKind, InputDeviceObserver, KeyInput, KeyInputKind, KeyboardAction,
    KeyboardEvent, MouseInput, MouseInputKind, PointerAction, PointerEvent, TouchAction, TouchEvent, TouchInput,
    TouchPointInput, TouchPointState, TouchTool, WheelInput,
};
use crate::logging::{INPUT, SESSIONS, SURFACES};
use crate::policy::ApplicationInfo;
use crate::screens::ScreensModel;
use crate::session::{ApplicationHandle, ClientSession, Session, SessionContext, SessionId};
use crate::surface::{CompositorSurface, Surface, SurfaceContext, ViewId};
use crate::texture::ConsumerId;
use crate::window::{WindowId, WindowInfo, WindowState};

mod dispatch;


pub use dispatch::{ShellWindowModel, UiDispatcher, UiHandle, UiLoop, UiTask};

/// The shell's own scene view of every surface
pub const SHELL_VIEW: ViewId = 0;

/// What the shell needs to look up in the compositor
pub trait CompositorAccess: Send + Sync {
    fn compositor_surface(&self, window: WindowId) -> Option<Arc<dyn CompositorSurface>>;
    fn client(&self, pid: u32) -> Option<Arc<dyn ClientSession>>;
    fn application(&self, pid: u32) -> Option<Arc<dyn ApplicationHandle>>;
}

pub struct Shell {
    compositor: Arc<dyn CompositorAccess>,
    screens: Arc<ScreensModel>,
    surface_ctx: SurfaceContext,
    session_ctx: SessionContext,
    keyboards: Arc<InputDeviceObserver>,
    sessions: HashMap<u32, Arc<Session>>,
    surfaces: HashMap<WindowId, Arc<Surface>>,
    /// Bottom to top
    stacking: Vec<WindowId>,
    /// Textures drawn by each render consumer, kept until the window goes
    render_items: HashMap<(WindowId, ConsumerId), Arc<BufferTexture>>,
    keyboard_focus: Option<WindowId>,
    next_session: u64,
    quit: bool,
}

impl Shell {
    pub fn new(
        compositor: Arc<dyn CompositorAccess>,
        screens: Arc<ScreensModel>,
        surface_ctx: SurfaceContext,
        session_ctx: SessionContext,
        keyboards: Arc<InputDeviceObserver>,
    ) -> Self {
        Self {
            compositor,
            screens,
            surface_ctx,
            session_ctx,
            keyboards,
            sessions: HashMap::new(),
            surfaces: HashMap::new(),
            stacking: Vec::new(),
            render_items: HashMap::new(),
            keyboard_focus: None,
            next_session: 1,
            quit: false,
        }
    }

    pub fn screens(&self) -> &Arc<ScreensModel> {
        &self.screens
    }

    pub fn input(&self) -> &Arc<EventBuilder> {
        &self.surface_ctx.input
    }

    pub fn session(&self, pid: u32) -> Option<Arc<Session>> {
        self.sessions.get(&pid).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.values().cloned().collect()
    }

    pub fn surface(&self, window: WindowId) -> Option<Arc<Surface>> {
        self.surfaces.get(&window).cloned()
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Windows bottom to top
    pub fn stacking(&self) -> &[WindowId] {
        &self.stacking
    }

    pub fn keyboard_focus(&self) -> Option<WindowId> {
        self.keyboard_focus
    }

    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Switches every surface and keyboard to a new `"layout+variant"`
    pub fn set_keymap(&mut self, keymap: &str) {
        self.keyboards.set_keymap(keymap);
        for surface in self.surfaces.values() {
            surface.set_keymap(keymap);
        }
    }

    // Applications

    pub fn app_added(&mut self, app: &ApplicationInfo) {
        if self.sessions.contains_key(&app.pid) {
            return;
        }
        let Some(client) = self.compositor.client(app.pid) else {
            debug!(target: SESSIONS, "Application {} (pid {}) is already gone", app.name, app.pid);
            return;
        };
        let session = Session::new(SessionId(self.next_session), client, &self.session_ctx);
        self.next_session += 1;
        session.set_application(self.compositor.application(app.pid));
        self.sessions.insert(app.pid, session);
    }

    pub fn app_removed(&mut self, pid: u32) {
        let Some(session) = self.sessions.remove(&pid) else {
            return;
        };
        session.set_live(false);
        session.destroy();
    }

    // Windows

    pub fn window_added(&mut self, info: &WindowInfo) {
        if self.surfaces.contains_key(&info.id) {
            return;
        }
        let Some(compositor_surface) = self.compositor.compositor_surface(info.id) else {
            debug!("{}: gone before the shell saw it", info.id);
            return;
        };
        let session = self.sessions.get(&info.client_pid).cloned();
        let parent = info.parent.and_then(|p| self.surfaces.get(&p).cloned());

        let surface = Surface::new(
            info,
            compositor_surface,
            session.as_ref(),
            parent.as_ref(),
            &self.surface_ctx,
        );
        if let Some(session) = &session {
            session.register_surface(surface.clone());
        }
        let keymap = self.keyboards.keymap();
        if !keymap.is_empty() {
            surface.set_keymap(&keymap);
        }
        self.surfaces.insert(info.id, surface);
        self.stacking.push(info.id);
    }

    pub fn window_ready(&mut self, window: WindowId) {
        let Some(surface) = self.surface(window) else {
            return;
        };
        surface.set_ready();
        surface.register_view(SHELL_VIEW);
        surface.set_view_exposure(SHELL_VIEW, self.screens.is_compositing());
    }

    pub fn window_removed(&mut self, window: WindowId) {
        let Some(surface) = self.surfaces.remove(&window) else {
            return;
        };
        self.stacking.retain(|w| *w != window);
        self.render_items.retain(|(w, _), _| *w != window);
        if self.keyboard_focus == Some(window) {
            self.keyboard_focus = None;
        }

        surface.unregister_view(SHELL_VIEW);
        if let Some(parent) = surface.parent() {
            parent.remove_child(window);
        }
        if let Some(session) = surface.session() {
            session.remove_surface(window);
        }
        surface.set_live(false);
    }

    pub fn window_state_changed(&mut self, window: WindowId, state: WindowState) {
        if let Some(surface) = self.surface(window) {
            surface.update_state(state);
        }
    }

    pub fn focus_changed(&mut self, window: WindowId, focused: bool) {
        let Some(surface) = self.surface(window) else {
            return;
        };
        if focused {
            self.keyboard_focus = Some(window);
        } else if self.keyboard_focus == Some(window) {
            self.keyboard_focus = None;
        }
        surface.set_focused(focused);
    }

    pub fn window_moved(&mut self, window: WindowId, top_left: Point) {
        if let Some(surface) = self.surface(window) {
            surface.set_position(top_left);
        }
    }

    pub fn windows_raised(&mut self, windows: &[WindowId]) {
        self.stacking.retain(|w| !windows.contains(w));
        self.stacking
            .extend(windows.iter().copied().filter(|w| self.surfaces.contains_key(w)));
    }

    pub fn raise_requested(&mut self, window: WindowId) {
        if let Some(surface) = self.surface(window) {
            surface.request_focus();
        }
    }

    pub fn frames_posted(&mut self, window: WindowId) {
        if let Some(surface) = self.surface(window) {
            surface.on_frames_posted();
        }
    }

    // Rendering

    /// One render pass for `consumer`. Returns how many surfaces had a
    /// buffer to draw.
    pub fn render(&mut self, consumer: ConsumerId) -> usize {
        if !self.screens.is_compositing() {
            return 0;
        }
        let mut drawn = 0;
        for window in &self.stacking {
            let Some(surface) = self.surfaces.get(window) else {
                continue;
            };
            if !surface.visible() {
                continue;
            }
            let texture = self
                .render_items
                .entry((*window, consumer))
                .or_insert_with(|| surface.texture(consumer));
            if !surface.update_texture(consumer) {
                continue;
            }
            match texture.bind() {
                Ok(()) => drawn += 1,
                Err(e) => error!(target: SURFACES, "{}: cannot draw: {}", window, e),
            }
        }
        for surface in self.surfaces.values() {
            surface.on_compositor_swapped_buffers();
        }
        drawn
    }

    pub fn compositor_starting(&mut self) {
        info!("Compositor starting");
        self.screens.on_compositor_starting();
        for surface in self.surfaces.values() {
            if surface.is_ready() {
                surface.set_view_exposure(SHELL_VIEW, true);
            }
        }
    }

    /// Stops rendering. Runs as a blocking handoff from the compositor.
    pub fn compositor_stopping(&mut self) {
        info!("Compositor stopping");
        for surface in self.surfaces.values() {
            surface.set_view_exposure(SHELL_VIEW, false);
        }
        self.screens.on_compositor_stopping();
    }

    /// Fires due surface and session timers
    pub fn poll_timers(&mut self) {
        let now = self.surface_ctx.clock.now();
        for surface in self.surfaces.values() {
            surface.poll_timers(now);
        }
        for session in self.sessions.values() {
            session.poll_timers(now);
        }
    }

    // Input routing

    fn focused_surface(&self) -> Option<Arc<Surface>> {
        self.keyboard_focus.and_then(|w| self.surface(w))
    }

    /// Topmost visible surface under `point`, with the point in its local
    /// coordinates
    fn surface_at(&self, point: Point) -> Option<(Arc<Surface>, Point)> {
        self.stacking.iter().rev().find_map(|window| {
            let surface = self.surfaces.get(window)?;
            if !surface.visible() {
                return None;
            }
            let top_left = surface.convert_local_to_display(surface.position());
            let area = Rect::from_loc_and_size(top_left, surface.size());
            if !area.contains(point) {
                return None;
            }
            let local = point - top_left;
            surface.input_area_contains(local).then(|| (surface.clone(), local))
        })
    }

    pub fn route_key(&mut self, event: &KeyboardEvent) {
        self.input().store(EventInfo {
            timestamp: event.timestamp,
            device_id: event.device_id,
            relative_x: 0.0,
            relative_y: 0.0,
            cookie: event.cookie.clone(),
        });
        let Some(surface) = self.focused_surface() else {
            debug!(target: INPUT, "Key event with no focused surface");
            return;
        };

        let key = KeyInput {
            kind: match event.action {
                KeyboardAction::Up => KeyInputKind::Release,
                KeyboardAction::Down | KeyboardAction::Repeat => KeyInputKind::Press,
            },
            auto_repeat: event.action == KeyboardAction::Repeat,
            native_virtual_key: event.key_code,
            native_scan_code: event.scan_code,
            native_modifiers: event.modifiers,
            timestamp: event.timestamp,
        };
        match key.kind {
            KeyInputKind::Press => surface.key_press(&key),
            KeyInputKind::Release => surface.key_release(&key),
        }
    }

    pub fn route_pointer(&mut self, event: &PointerEvent) {
        self.input().store(EventInfo {
            timestamp: event.timestamp,
            device_id: event.device_id,
            relative_x: event.relative_x,
            relative_y: event.relative_y,
            cookie: event.cookie.clone(),
        });
        let point = Point::new(event.x as i32, event.y as i32);
        let Some((surface, position)) = self.surface_at(point) else {
            debug!(target: INPUT, "Pointer event at {:?} hit no surface", point);
            return;
        };

        if event.hscroll != 0.0 || event.vscroll != 0.0 {
            surface.wheel_event(&WheelInput {
                position,
                angle_delta: Point::new((event.hscroll * 120.0) as i32, (event.vscroll * 120.0) as i32),
                buttons: event.buttons,
                modifiers: event.modifiers,
                timestamp: event.timestamp,
            });
            return;
        }

        let mouse = |kind| MouseInput {
            kind,
            position,
            buttons: event.buttons,
            modifiers: event.modifiers,
            timestamp: event.timestamp,
        };
        let hover = |kind| HoverInput {
            kind,
            position,
            modifiers: event.modifiers,
            timestamp: event.timestamp,
        };
        match event.action {
            PointerAction::ButtonDown => surface.mouse_event(&mouse(MouseInputKind::Press)),
            PointerAction::ButtonUp => surface.mouse_event(&mouse(MouseInputKind::Release)),
            PointerAction::Motion => surface.mouse_event(&mouse(MouseInputKind::Move)),
            PointerAction::Enter => surface.hover_event(&hover(HoverInputKind::Enter)),
            PointerAction::Leave => surface.hover_event(&hover(HoverInputKind::Leave)),
        }
    }

    pub fn route_touch(&mut self, event: &TouchEvent) {
        self.input().store(EventInfo {
            timestamp: event.timestamp,
            device_id: event.device_id,
            relative_x: 0.0,
            relative_y: 0.0,
            cookie: event.cookie.clone(),
        });
        let Some(first) = event.contacts.first() else {
            return;
        };
        let point = Point::new(first.x as i32, first.y as i32);
        let Some((surface, local)) = self.surface_at(point) else {
            debug!(target: INPUT, "Touch at {:?} hit no surface", point);
            return;
        };
        let offset = point - local;

        let points = event
            .contacts
            .iter()
            .map(|contact| TouchPointInput {
                id: contact.id,
                state: match contact.action {
                    TouchAction::Down => TouchPointState::Pressed,
                    TouchAction::Up => TouchPointState::Released,
                    TouchAction::Change => TouchPointState::Moved,
                },
                is_pen: contact.tool == TouchTool::Stylus,
                x: contact.x - offset.x as f32,
                y: contact.y - offset.y as f32,
                pressure: contact.pressure,
                width: contact.touch_major,
                height: contact.touch_minor,
            })
            .collect();
        surface.touch_event(&TouchInput {
            modifiers: event.modifiers,
            points,
            timestamp: event.timestamp,
        });
    }
}
