//! The shell's policy wrapper: hooks delegate to an inner policy, the shell
//! operations run under the window table lock

use log::{debug, error, warn};
use std::cell::Cell;
use std::sync::Arc;

use super::{
    extra_info, ApplicationInfo, BasePolicy, PolicyState, WindowManagementPolicy, WindowManagerTools, WindowTable,
    WorkspaceId,
};
use crate::error::Result;
use crate::geometry::{Displacement, Margins, Point, Rect, Size};
use crate::input::{InputEvent, KeyboardAction, KeyboardEvent, PointerAction, PointerEvent, TouchEvent};
use crate::logging::POLICY;
use crate::screens::OutputConfiguration;
use crate::surface::WindowController;
use crate::window::{
    CompositorWindowState, Placement, WindowId, WindowInfo, WindowSpecification, WindowState, WindowType,
};

thread_local! {
    static UNDER_LOCK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as holding the window table lock
struct LockGuard;

impl LockGuard {
    fn acquire() -> Option<Self> {
        if UNDER_LOCK.with(|held| held.replace(true)) {
            None
        } else {
            Some(LockGuard)
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        UNDER_LOCK.with(|held| held.set(false));
    }
}

/// Logs a failed window operation. Missing windows are expected when the
/// compositor tore a window down while the shell still held it.
fn log_failure(operation: &str, window: WindowId, result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_benign_race() => debug!(target: POLICY, "{}: {} ignored: {}", window, operation, e),
        Err(e) => warn!(target: POLICY, "{}: {} failed: {}", window, operation, e),
    }
}

pub struct ShellPolicy {
    tools: Arc<dyn WindowManagerTools>,
    state: Arc<PolicyState>,
    inner: Box<dyn WindowManagementPolicy>,
}

impl ShellPolicy {
    /// Wraps the default [`BasePolicy`]
    pub fn new(tools: Arc<dyn WindowManagerTools>, state: Arc<PolicyState>) -> Self {
        Self::with_policy(tools, state, |tools, state| Box::new(BasePolicy::new(tools, state)))
    }

    /// Wraps the policy built by `build`
    pub fn with_policy<F>(tools: Arc<dyn WindowManagerTools>, state: Arc<PolicyState>, build: F) -> Self
    where
        F: FnOnce(Arc<dyn WindowManagerTools>, Arc<PolicyState>) -> Box<dyn WindowManagementPolicy>,
    {
        let inner = build(tools.clone(), state.clone());
        Self { tools, state, inner }
    }

    pub fn state(&self) -> &Arc<PolicyState> {
        &self.state
    }

    /// Runs `f` with the window table locked. Returns `None` when called
    /// from inside another locked section.
    fn under_lock<R>(&self, f: impl FnOnce(&mut dyn WindowTable) -> R) -> Option<R> {
        let Some(_guard) = LockGuard::acquire() else {
            error!(target: POLICY, "Refusing nested window table lock");
            return None;
        };

        let mut f = Some(f);
        let mut result = None;
        self.tools.invoke_under_lock(&mut |table| {
            if let Some(f) = f.take() {
                result = Some(f(table));
            }
        });
        result
    }

    fn info(&self, window: WindowId) -> Option<WindowInfo> {
        match self.tools.info_for(window) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(target: POLICY, "{}: {}", window, e);
                None
            }
        }
    }

    /// Activates `window`, restoring it first if it is minimized
    pub fn activate(&self, window: WindowId) {
        let Some(info) = self.info(window) else {
            return;
        };

        if info.state == CompositorWindowState::Minimized {
            if let Some(extra) = extra_info(&info) {
                self.request_state(window, extra.previous_state());
            }
        }

        self.under_lock(|table| {
            table.select_active_window(window);
        });
    }

    pub fn resize(&self, window: WindowId, size: Size) {
        let modifications = WindowSpecification {
            size: Some(size),
            ..Default::default()
        };
        self.modify(window, modifications, "resize");
    }

    pub fn move_to(&self, window: WindowId, top_left: Point) {
        let modifications = WindowSpecification {
            top_left: Some(top_left),
            ..Default::default()
        };
        self.modify(window, modifications, "move");
    }

    fn modify(&self, window: WindowId, modifications: WindowSpecification, operation: &str) {
        if let Some(result) = self.under_lock(|table| table.modify_window(window, &modifications)) {
            log_failure(operation, window, result);
        }
    }

    pub fn raise(&self, window: WindowId) {
        if let Some(result) = self.under_lock(|table| table.raise_tree(window)) {
            log_failure("raise", window, result);
        }
    }

    /// Moves `window` into `state`. States the compositor cannot tell apart
    /// from the current one only update the shell's record.
    pub fn request_state(&self, window: WindowId, state: WindowState) {
        let Some(info) = self.info(window) else {
            return;
        };
        let Some(extra) = extra_info(&info) else {
            debug!(target: POLICY, "{}: no shell record, ignoring state request", window);
            return;
        };

        if !extra.transition_to(state) {
            return;
        }

        let compositor_state = state.to_compositor();
        if compositor_state == info.state {
            // Nothing changes in the compositor, so no advice will come back
            self.inner.advise_state_change(&info, compositor_state);
        } else {
            let modifications = WindowSpecification {
                state: Some(compositor_state),
                ..Default::default()
            };
            self.modify(window, modifications, "request_state");
        }
    }

    pub fn ask_client_to_close(&self, window: WindowId) {
        if let Some(result) = self.under_lock(|table| table.ask_client_to_close(window)) {
            log_failure("ask_client_to_close", window, result);
        }
    }

    pub fn force_close(&self, window: WindowId) {
        if let Some(result) = self.under_lock(|table| table.force_close(window)) {
            log_failure("force_close", window, result);
        }
    }

    pub fn set_window_confinement_regions(&self, regions: Vec<Rect>) {
        self.state.set_confinement_regions(regions);
    }

    pub fn set_window_margins(&self, window_type: WindowType, margins: Margins) {
        self.state.set_window_margins(window_type, margins);
    }

    pub fn windows_in_workspace(&self, workspace: WorkspaceId) -> Vec<WindowId> {
        self.under_lock(|table| table.windows_in_workspace(workspace))
            .unwrap_or_default()
    }

    pub fn move_workspace_content_to_workspace(&self, to: WorkspaceId, from: WorkspaceId) {
        self.under_lock(|table| table.move_workspace_content_to_workspace(to, from));
    }

    /// Moves the whole tree `window` belongs to into `workspace`, taking it
    /// out of every other workspace
    pub fn move_window_to_workspace(&self, window: WindowId, workspace: WorkspaceId) {
        let result = self.under_lock(|table| -> Result<()> {
            let mut root = window;
            while let Some(parent) = table.info(root)?.parent {
                root = parent;
            }

            for from in table.workspaces_containing(root) {
                table.remove_tree_from_workspace(root, from)?;
            }
            table.add_tree_to_workspace(root, workspace)
        });
        if let Some(result) = result {
            log_failure("move_window_to_workspace", window, result);
        }
    }

    /// Makes `window` active unless it already is. Returns false when the
    /// table could not be locked.
    fn focus_for_input(&self, window: WindowId) -> bool {
        self.under_lock(|table| {
            if table.active_window() != Some(window) {
                debug!(target: POLICY, "{}: activated by input", window);
                table.select_active_window(window);
            }
        })
        .is_some()
    }

    fn dispatch(&self, window: WindowId, event: InputEvent) {
        self.tools.dispatch_input_event(window, event);
    }
}

impl WindowController for ShellPolicy {
    fn request_close(&self, window: WindowId) {
        self.ask_client_to_close(window);
    }

    fn force_close(&self, window: WindowId) {
        ShellPolicy::force_close(self, window);
    }

    fn resize(&self, window: WindowId, size: Size) {
        ShellPolicy::resize(self, window, size);
    }

    fn move_to(&self, window: WindowId, top_left: Point) {
        ShellPolicy::move_to(self, window, top_left);
    }

    fn request_state(&self, window: WindowId, state: WindowState) {
        ShellPolicy::request_state(self, window, state);
    }

    fn activate(&self, window: WindowId) {
        ShellPolicy::activate(self, window);
    }

    fn raise(&self, window: WindowId) {
        ShellPolicy::raise(self, window);
    }

    fn deliver_keyboard_event(&self, window: WindowId, event: KeyboardEvent) {
        if event.action == KeyboardAction::Down {
            self.focus_for_input(window);
        }
        self.dispatch(window, InputEvent::Keyboard(event));
    }

    fn deliver_pointer_event(&self, window: WindowId, event: PointerEvent) {
        if event.action == PointerAction::ButtonDown {
            self.focus_for_input(window);
        }
        self.dispatch(window, InputEvent::Pointer(event));
    }

    fn deliver_touch_event(&self, window: WindowId, event: TouchEvent) {
        self.focus_for_input(window);
        self.dispatch(window, InputEvent::Touch(event));
    }
}

impl WindowManagementPolicy for ShellPolicy {
    fn place_new_window(&self, app: &ApplicationInfo, request: &WindowSpecification) -> Placement {
        self.inner.place_new_window(app, request)
    }

    fn handle_window_ready(&self, info: &WindowInfo) {
        self.inner.handle_window_ready(info)
    }

    fn handle_modify_window(&self, info: &WindowInfo, modifications: &WindowSpecification) -> WindowSpecification {
        self.inner.handle_modify_window(info, modifications)
    }

    fn handle_raise_window(&self, info: &WindowInfo) {
        self.inner.handle_raise_window(info)
    }

    fn confirm_placement_on_display(
        &self,
        info: &WindowInfo,
        new_state: CompositorWindowState,
        placement: Rect,
    ) -> Rect {
        self.inner.confirm_placement_on_display(info, new_state, placement)
    }

    fn confirm_inherited_move(&self, info: &WindowInfo, movement: Displacement) -> Rect {
        self.inner.confirm_inherited_move(info, movement)
    }

    fn handle_keyboard_event(&self, event: &KeyboardEvent) -> bool {
        self.inner.handle_keyboard_event(event)
    }

    fn handle_touch_event(&self, event: &TouchEvent) -> bool {
        self.inner.handle_touch_event(event)
    }

    fn handle_pointer_event(&self, event: &PointerEvent) -> bool {
        self.inner.handle_pointer_event(event)
    }

    fn advise_begin(&self) {
        self.inner.advise_begin()
    }

    fn advise_end(&self) {
        self.inner.advise_end()
    }

    fn advise_new_app(&self, app: &ApplicationInfo) {
        self.inner.advise_new_app(app)
    }

    fn advise_delete_app(&self, app: &ApplicationInfo) {
        self.inner.advise_delete_app(app)
    }

    fn advise_new_window(&self, info: &WindowInfo) {
        self.inner.advise_new_window(info)
    }

    fn advise_delete_window(&self, info: &WindowInfo) {
        self.inner.advise_delete_window(info)
    }

    fn advise_focus_lost(&self, info: &WindowInfo) {
        self.inner.advise_focus_lost(info)
    }

    fn advise_focus_gained(&self, info: &WindowInfo) {
        self.inner.advise_focus_gained(info)
    }

    fn advise_state_change(&self, info: &WindowInfo, state: CompositorWindowState) {
        self.inner.advise_state_change(info, state)
    }

    fn advise_move_to(&self, info: &WindowInfo, top_left: Point) {
        self.inner.advise_move_to(info, top_left)
    }

    fn advise_resize(&self, info: &WindowInfo, size: Size) {
        self.inner.advise_resize(info, size)
    }

    fn advise_raise(&self, windows: &[WindowId]) {
        self.inner.advise_raise(windows)
    }

    fn advise_adding_to_workspace(&self, workspace: WorkspaceId, windows: &[WindowId]) {
        self.inner.advise_adding_to_workspace(workspace, windows)
    }

    fn advise_removing_from_workspace(&self, workspace: WorkspaceId, windows: &[WindowId]) {
        self.inner.advise_removing_from_workspace(workspace, windows)
    }

    fn advise_output_create(&self, output: &OutputConfiguration) {
        self.inner.advise_output_create(output)
    }

    fn advise_output_update(&self, updated: &OutputConfiguration, original: &OutputConfiguration) {
        self.inner.advise_output_update(updated, original)
    }

    fn advise_output_delete(&self, output: &OutputConfiguration) {
        self.inner.advise_output_delete(output)
    }

    fn handle_request_move(&self, info: &WindowInfo) {
        self.inner.handle_request_move(info)
    }

    fn handle_request_resize(&self, info: &WindowInfo) {
        self.inner.handle_request_resize(info)
    }

    fn handle_request_drag_and_drop(&self, info: &WindowInfo) {
        self.inner.handle_request_drag_and_drop(info)
    }
}
