//! Window management policy
//!
//! The compositor consults a [`WindowManagementPolicy`] about placement and
//! tells it about every change to its window table. [`BasePolicy`] is the
//! shell's default: it relays changes to the UI as window model signals and
//! feeds input to the UI. [`ShellPolicy`] wraps any policy by delegation and
//! adds the operations the shell performs on windows.
//!
//! Every mutation of the compositor's window table goes through
//! [`WindowManagerTools::invoke_under_lock`]. Nesting it deadlocks, so
//! nested calls are refused.

use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PolicyConfig;
use crate::error::Result;
use crate::geometry::{Displacement, Margins, Point, Rect, Size};
use crate::input::{InputEvent, KeyboardEvent, PointerEvent, TouchEvent};
use crate::logging::POLICY;
use crate::screens::{OutputConfiguration, OutputObserver};
use crate::signals::{AppSignal, EventSink, WindowModelSignal};
use crate::window::{
    CompositorWindowState, ExtraWindowInfo, Placement, WindowId, WindowInfo, WindowSpecification, WindowState,
    WindowType,
};

mod confinement;
mod shell;

#[cfg(test)]
mod tests;

pub use confinement::{confine_inherited_move, confinement_rect_for};
pub use shell::ShellPolicy;

pub type WorkspaceId = u64;

/// A client application as the compositor knows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub pid: u32,
    pub name: String,
}

/// The compositor's window table. Only reachable under its lock.
pub trait WindowTable {
    fn info(&self, window: WindowId) -> Result<WindowInfo>;
    fn active_window(&self) -> Option<WindowId>;
    /// Returns the window that actually became active
    fn select_active_window(&mut self, window: WindowId) -> Option<WindowId>;
    fn modify_window(&mut self, window: WindowId, modifications: &WindowSpecification) -> Result<()>;
    fn raise_tree(&mut self, window: WindowId) -> Result<()>;
    fn ask_client_to_close(&mut self, window: WindowId) -> Result<()>;
    fn force_close(&mut self, window: WindowId) -> Result<()>;
    fn workspaces_containing(&self, window: WindowId) -> Vec<WorkspaceId>;
    fn windows_in_workspace(&self, workspace: WorkspaceId) -> Vec<WindowId>;
    fn add_tree_to_workspace(&mut self, window: WindowId, workspace: WorkspaceId) -> Result<()>;
    fn remove_tree_from_workspace(&mut self, window: WindowId, workspace: WorkspaceId) -> Result<()>;
    fn move_workspace_content_to_workspace(&mut self, to: WorkspaceId, from: WorkspaceId);
}

/// Access to the compositor's window management
pub trait WindowManagerTools: Send + Sync {
    /// Runs `f` with exclusive access to the window table
    fn invoke_under_lock(&self, f: &mut dyn FnMut(&mut dyn WindowTable));

    /// Snapshot of one window record
    fn info_for(&self, window: WindowId) -> Result<WindowInfo>;

    /// Stable id of a window across shell restarts
    fn id_for_window(&self, window: WindowId) -> String;

    /// Hands an input event to the window's client
    fn dispatch_input_event(&self, window: WindowId, event: InputEvent);
}

/// Receives raw input from the compositor for the UI to route
pub trait InputFeeder: Send + Sync {
    fn dispatch_key(&self, event: &KeyboardEvent);
    fn dispatch_pointer(&self, event: &PointerEvent);
    fn dispatch_touch(&self, event: &TouchEvent);
}

/// Initial window sizes requested for applications before they connect
#[derive(Debug, Default)]
pub struct InitialSurfaceSizes {
    sizes: Mutex<HashMap<u32, Size>>,
}

impl InitialSurfaceSizes {
    pub fn set(&self, pid: u32, size: Size) {
        self.sizes.lock().insert(pid, size);
    }

    /// An invalid size when nothing was requested for `pid`
    pub fn get(&self, pid: u32) -> Size {
        self.sizes.lock().get(&pid).copied().unwrap_or_else(Size::invalid)
    }

    pub fn remove(&self, pid: u32) {
        self.sizes.lock().remove(&pid);
    }
}

/// State shared by a policy and any policy wrapping it
pub struct PolicyState {
    events: EventSink,
    feeder: Arc<dyn InputFeeder>,
    outputs: Arc<dyn OutputObserver>,
    confinement_regions: RwLock<Vec<Rect>>,
    window_margins: RwLock<HashMap<WindowType, Margins>>,
    initial_sizes: InitialSurfaceSizes,
}

impl PolicyState {
    pub fn new(
        events: EventSink,
        feeder: Arc<dyn InputFeeder>,
        outputs: Arc<dyn OutputObserver>,
        config: &PolicyConfig,
    ) -> Arc<Self> {
        let margins = config
            .window_margins
            .iter()
            .map(|m| (m.window_type, m.margins))
            .collect();
        Arc::new(Self {
            events,
            feeder,
            outputs,
            confinement_regions: RwLock::new(config.confinement_regions.clone()),
            window_margins: RwLock::new(margins),
            initial_sizes: InitialSurfaceSizes::default(),
        })
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn confinement_regions(&self) -> Vec<Rect> {
        self.confinement_regions.read().clone()
    }

    pub fn set_confinement_regions(&self, regions: Vec<Rect>) {
        *self.confinement_regions.write() = regions;
    }

    pub fn window_margins(&self, window_type: WindowType) -> Margins {
        self.window_margins.read().get(&window_type).copied().unwrap_or_default()
    }

    pub fn set_window_margins(&self, window_type: WindowType, margins: Margins) {
        self.window_margins.write().insert(window_type, margins);
    }

    pub fn initial_sizes(&self) -> &InitialSurfaceSizes {
        &self.initial_sizes
    }
}

/// Extra info attached at placement. Windows placed by another policy may
/// lack it.
pub fn extra_info(info: &WindowInfo) -> Option<Arc<ExtraWindowInfo>> {
    info.extra.clone()
}

/// Decisions and notifications the compositor asks a policy for.
///
/// Hooks are called from the compositor thread without the window table
/// lock held.
pub trait WindowManagementPolicy: Send + Sync {
    fn place_new_window(&self, app: &ApplicationInfo, request: &WindowSpecification) -> Placement;
    fn handle_window_ready(&self, info: &WindowInfo);
    /// Returns the modifications the compositor should actually apply
    fn handle_modify_window(&self, info: &WindowInfo, modifications: &WindowSpecification) -> WindowSpecification;
    fn handle_raise_window(&self, info: &WindowInfo);
    fn confirm_placement_on_display(&self, info: &WindowInfo, new_state: CompositorWindowState, placement: Rect)
        -> Rect;
    /// Geometry a child window ends up with when its parent moves
    fn confirm_inherited_move(&self, info: &WindowInfo, movement: Displacement) -> Rect;

    /// Input hooks; returning true consumes the event
    fn handle_keyboard_event(&self, event: &KeyboardEvent) -> bool;
    fn handle_touch_event(&self, event: &TouchEvent) -> bool;
    fn handle_pointer_event(&self, event: &PointerEvent) -> bool;

    fn advise_begin(&self);
    fn advise_end(&self);
    fn advise_new_app(&self, app: &ApplicationInfo);
    fn advise_delete_app(&self, app: &ApplicationInfo);
    fn advise_new_window(&self, info: &WindowInfo);
    fn advise_delete_window(&self, info: &WindowInfo);
    fn advise_focus_lost(&self, info: &WindowInfo);
    fn advise_focus_gained(&self, info: &WindowInfo);
    fn advise_state_change(&self, info: &WindowInfo, state: CompositorWindowState);
    fn advise_move_to(&self, info: &WindowInfo, top_left: Point);
    fn advise_resize(&self, info: &WindowInfo, size: Size);
    fn advise_raise(&self, windows: &[WindowId]);
    fn advise_adding_to_workspace(&self, workspace: WorkspaceId, windows: &[WindowId]);
    fn advise_removing_from_workspace(&self, workspace: WorkspaceId, windows: &[WindowId]);
    fn advise_output_create(&self, output: &OutputConfiguration);
    fn advise_output_update(&self, updated: &OutputConfiguration, original: &OutputConfiguration);
    fn advise_output_delete(&self, output: &OutputConfiguration);

    fn handle_request_move(&self, _info: &WindowInfo) {}
    fn handle_request_resize(&self, _info: &WindowInfo) {}
    fn handle_request_drag_and_drop(&self, _info: &WindowInfo) {}
}

/// The shell's default policy
pub struct BasePolicy {
    tools: Arc<dyn WindowManagerTools>,
    state: Arc<PolicyState>,
}

impl BasePolicy {
    pub fn new(tools: Arc<dyn WindowManagerTools>, state: Arc<PolicyState>) -> Self {
        Self { tools, state }
    }

    fn window_model(&self, signal: WindowModelSignal) {
        self.state.events.window_model(signal);
    }
}

impl WindowManagementPolicy for BasePolicy {
    fn place_new_window(&self, app: &ApplicationInfo, request: &WindowSpecification) -> Placement {
        let mut spec = request.clone();

        // Initial sizes only apply to an application's main windows
        if request.parent.is_none() && request.window_type == Some(WindowType::Normal) {
            let initial = self.state.initial_sizes.get(app.pid);
            if initial.is_valid() {
                debug!(target: POLICY, "Initial size {:?} for pid {}", initial, app.pid);
                spec.size = Some(initial);
            }
        }

        Placement {
            spec,
            extra: Arc::new(ExtraWindowInfo::new(String::new())),
        }
    }

    fn handle_window_ready(&self, info: &WindowInfo) {
        self.window_model(WindowModelSignal::WindowReady(info.id));
    }

    fn handle_modify_window(&self, info: &WindowInfo, modifications: &WindowSpecification) -> WindowSpecification {
        let mut modifications = modifications.clone();
        if modifications.size.is_some() {
            let allowed = extra_info(info).map(|e| e.allow_client_resize()).unwrap_or(true);
            if !allowed {
                debug!(target: POLICY, "{}: dropping client resize", info.id);
                modifications.size = None;
            }
        }
        modifications
    }

    fn handle_raise_window(&self, info: &WindowInfo) {
        self.window_model(WindowModelSignal::WindowRequestedRaise(info.id));
    }

    fn confirm_placement_on_display(
        &self,
        _info: &WindowInfo,
        _new_state: CompositorWindowState,
        placement: Rect,
    ) -> Rect {
        placement
    }

    fn confirm_inherited_move(&self, info: &WindowInfo, movement: Displacement) -> Rect {
        let regions = self.state.confinement_regions();
        let margins = self.state.window_margins(info.window_type);
        confine_inherited_move(info.geometry(), margins, &regions, movement)
    }

    fn handle_keyboard_event(&self, event: &KeyboardEvent) -> bool {
        self.state.feeder.dispatch_key(event);
        true
    }

    fn handle_touch_event(&self, event: &TouchEvent) -> bool {
        self.state.feeder.dispatch_touch(event);
        true
    }

    fn handle_pointer_event(&self, event: &PointerEvent) -> bool {
        self.state.feeder.dispatch_pointer(event);
        true
    }

    fn advise_begin(&self) {
        self.window_model(WindowModelSignal::ModificationsStarted);
    }

    fn advise_end(&self) {
        self.window_model(WindowModelSignal::ModificationsEnded);
    }

    fn advise_new_app(&self, app: &ApplicationInfo) {
        self.state.events.app(AppSignal::Added(app.pid));
    }

    fn advise_delete_app(&self, app: &ApplicationInfo) {
        self.state.initial_sizes.remove(app.pid);
        self.state.events.app(AppSignal::Removed(app.pid));
    }

    fn advise_new_window(&self, info: &WindowInfo) {
        if let Some(extra) = extra_info(info) {
            extra.set_persistent_id(self.tools.id_for_window(info.id));
            extra.set_state(WindowState::from_compositor(info.state));
        }
        self.window_model(WindowModelSignal::WindowAdded(info.id));
    }

    fn advise_delete_window(&self, info: &WindowInfo) {
        self.window_model(WindowModelSignal::WindowRemoved(info.id));
    }

    fn advise_focus_lost(&self, info: &WindowInfo) {
        self.window_model(WindowModelSignal::WindowFocusChanged(info.id, false));
    }

    fn advise_focus_gained(&self, info: &WindowInfo) {
        self.window_model(WindowModelSignal::WindowFocusChanged(info.id, true));
    }

    fn advise_state_change(&self, info: &WindowInfo, state: CompositorWindowState) {
        let Some(extra) = extra_info(info) else {
            self.window_model(WindowModelSignal::WindowStateChanged(
                info.id,
                WindowState::from_compositor(state),
            ));
            return;
        };

        // Half and quarter maximized states reach the compositor as a
        // `Restored` placeholder; keep the shell's richer state
        let keep = state == CompositorWindowState::Restored && extra.state().is_placeholder();
        if !keep {
            extra.set_state(WindowState::from_compositor(state));
        }

        self.window_model(WindowModelSignal::WindowStateChanged(info.id, extra.state()));
    }

    fn advise_move_to(&self, info: &WindowInfo, top_left: Point) {
        self.window_model(WindowModelSignal::WindowMoved(info.id, top_left));
    }

    fn advise_resize(&self, info: &WindowInfo, size: Size) {
        self.window_model(WindowModelSignal::WindowResized(info.id, size));
    }

    fn advise_raise(&self, windows: &[WindowId]) {
        self.window_model(WindowModelSignal::WindowsRaised(windows.to_vec()));
    }

    fn advise_adding_to_workspace(&self, workspace: WorkspaceId, windows: &[WindowId]) {
        self.window_model(WindowModelSignal::WindowsAddedToWorkspace(workspace, windows.to_vec()));
    }

    fn advise_removing_from_workspace(&self, workspace: WorkspaceId, windows: &[WindowId]) {
        self.window_model(WindowModelSignal::WindowsAboutToBeRemovedFromWorkspace(
            workspace,
            windows.to_vec(),
        ));
    }

    fn advise_output_create(&self, output: &OutputConfiguration) {
        debug!(target: POLICY, "Output {} created", output.id);
        self.state.outputs.outputs_changed();
    }

    fn advise_output_update(&self, updated: &OutputConfiguration, _original: &OutputConfiguration) {
        debug!(target: POLICY, "Output {} updated", updated.id);
        self.state.outputs.outputs_changed();
    }

    fn advise_output_delete(&self, output: &OutputConfiguration) {
        debug!(target: POLICY, "Output {} deleted", output.id);
        self.state.outputs.outputs_changed();
    }
}
