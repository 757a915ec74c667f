//! Handoff from compositor threads to the UI thread
//!
//! Compositor callbacks never touch UI-thread state directly. They post a
//! [`UiTask`] through a [`UiHandle`], and the [`UiLoop`] runs it on the UI
//! thread. The queue is bounded, so a stalled UI thread pushes back on the
//! compositor instead of growing without limit.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

use super::Shell;
use crate::error::{Result, ShellError};
use crate::geometry::{Displacement, Point, Rect, Size};
use crate::input::{KeyboardEvent, PointerEvent, TouchEvent};
use crate::logging::POLICY;
use crate::policy::{extra_info, ApplicationInfo, InputFeeder, WindowManagementPolicy, WorkspaceId};
use crate::screens::{OutputConfiguration, OutputObserver};
use crate::surface::FrameObserver;
use crate::window::{CompositorWindowState, Placement, WindowId, WindowInfo, WindowSpecification, WindowState};

/// Work for the UI thread
pub type UiTask = Box<dyn FnOnce(&mut Shell) + Send>;

/// Posts work to the UI thread. Cheap to clone.
#[derive(Clone)]
pub struct UiHandle {
    tasks: Sender<UiTask>,
}

impl UiHandle {
    /// Queues `task`, waiting while the queue is full
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&mut Shell) + Send + 'static,
    {
        self.tasks.send(Box::new(task)).map_err(|_| ShellError::UiThreadGone)
    }

    /// Runs `task` on the UI thread and waits for its result.
    ///
    /// Only for teardown ordering. Calling this from the UI thread itself
    /// always times out. `timeout` covers both queueing the task and
    /// waiting for its result.
    pub fn blocking_handoff<F, R>(&self, task: F, timeout: Duration) -> Result<R>
    where
        F: FnOnce(&mut Shell) -> R + Send + 'static,
        R: Send + 'static,
    {
        let started = Instant::now();
        let (reply_tx, reply_rx) = bounded(1);
        let wrapped: UiTask = Box::new(move |shell: &mut Shell| {
            let _ = reply_tx.send(task(shell));
        });
        match self.tasks.send_timeout(wrapped, timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Err(ShellError::HandoffTimedOut(timeout)),
            Err(SendTimeoutError::Disconnected(_)) => return Err(ShellError::UiThreadGone),
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        match reply_rx.recv_timeout(remaining) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(ShellError::HandoffTimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ShellError::UiThreadGone),
        }
    }

    /// Asks the UI loop to return
    pub fn quit(&self) -> Result<()> {
        self.post(|shell| shell.request_quit())
    }

    fn post_or_log<F>(&self, what: &str, task: F)
    where
        F: FnOnce(&mut Shell) + Send + 'static,
    {
        if self.post(task).is_err() {
            debug!(target: POLICY, "UI thread gone, dropping {}", what);
        }
    }
}

/// The UI thread's end of the queue
pub struct UiLoop {
    tasks: Receiver<UiTask>,
}

impl UiLoop {
    pub fn new(capacity: usize) -> (UiHandle, UiLoop) {
        let (tx, rx) = bounded(capacity.max(1));
        (UiHandle { tasks: tx }, UiLoop { tasks: rx })
    }

    /// Runs every queued task without waiting. Returns how many ran.
    pub fn run_pending(&self, shell: &mut Shell) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.tasks.try_recv() {
            task(shell);
            ran += 1;
        }
        ran
    }

    /// Runs tasks and timers until asked to quit or every handle is gone
    pub fn run(&self, shell: &mut Shell, tick: Duration) {
        info!("UI loop running");
        while !shell.quit_requested() {
            match self.tasks.recv_timeout(tick) {
                Ok(task) => task(shell),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("All UI handles dropped");
                    break;
                }
            }
            shell.poll_timers();
        }
        info!("UI loop stopped");
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

/// Relays compositor notifications that the UI must act on
#[derive(Clone)]
pub struct UiDispatcher {
    ui: UiHandle,
}

impl UiDispatcher {
    pub fn new(ui: UiHandle) -> Self {
        Self { ui }
    }

    pub fn compositor_starting(&self) {
        self.ui.post_or_log("compositor start", |shell| shell.compositor_starting());
    }

    /// Blocks until the UI thread has stopped rendering
    pub fn compositor_stopping(&self, timeout: Duration) -> Result<()> {
        match self.ui.blocking_handoff(|shell| shell.compositor_stopping(), timeout) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Compositor stopping without the UI thread: {}", e);
                Err(e)
            }
        }
    }
}

impl OutputObserver for UiDispatcher {
    fn outputs_changed(&self) {
        self.ui.post_or_log("output change", |shell| shell.screens().update());
    }
}

impl InputFeeder for UiDispatcher {
    fn dispatch_key(&self, event: &KeyboardEvent) {
        let event = event.clone();
        self.ui.post_or_log("key event", move |shell| shell.route_key(&event));
    }

    fn dispatch_pointer(&self, event: &PointerEvent) {
        let event = event.clone();
        self.ui.post_or_log("pointer event", move |shell| shell.route_pointer(&event));
    }

    fn dispatch_touch(&self, event: &TouchEvent) {
        let event = event.clone();
        self.ui.post_or_log("touch event", move |shell| shell.route_touch(&event));
    }
}

impl FrameObserver for UiDispatcher {
    fn frames_posted(&self, window: WindowId) {
        self.ui.post_or_log("frame notification", move |shell| shell.frames_posted(window));
    }
}

/// Keeps the shell's surfaces and sessions in step with the compositor's
/// window model. Decorates another policy and forwards every hook to it.
pub struct ShellWindowModel {
    inner: Box<dyn WindowManagementPolicy>,
    ui: UiHandle,
}

impl ShellWindowModel {
    pub fn new(inner: Box<dyn WindowManagementPolicy>, ui: UiHandle) -> Self {
        Self { inner, ui }
    }
}

impl WindowManagementPolicy for ShellWindowModel {
    fn place_new_window(&self, app: &ApplicationInfo, request: &WindowSpecification) -> Placement {
        self.inner.place_new_window(app, request)
    }

    fn handle_window_ready(&self, info: &WindowInfo) {
        self.inner.handle_window_ready(info);
        let id = info.id;
        self.ui.post_or_log("window ready", move |shell| shell.window_ready(id));
    }

    fn handle_modify_window(&self, info: &WindowInfo, modifications: &WindowSpecification) -> WindowSpecification {
        self.inner.handle_modify_window(info, modifications)
    }

    fn handle_raise_window(&self, info: &WindowInfo) {
        self.inner.handle_raise_window(info);
        let id = info.id;
        self.ui.post_or_log("raise request", move |shell| shell.raise_requested(id));
    }

    fn confirm_placement_on_display(&self, info: &WindowInfo, new_state: CompositorWindowState, placement: Rect) -> Rect {
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
        self.inner.advise_begin();
    }

    fn advise_end(&self) {
        self.inner.advise_end();
    }

    fn advise_new_app(&self, app: &ApplicationInfo) {
        self.inner.advise_new_app(app);
        let app = app.clone();
        self.ui.post_or_log("new application", move |shell| shell.app_added(&app));
    }

    fn advise_delete_app(&self, app: &ApplicationInfo) {
        self.inner.advise_delete_app(app);
        let pid = app.pid;
        self.ui.post_or_log("application removal", move |shell| shell.app_removed(pid));
    }

    fn advise_new_window(&self, info: &WindowInfo) {
        self.inner.advise_new_window(info);
        let info = info.clone();
        self.ui.post_or_log("new window", move |shell| shell.window_added(&info));
    }

    fn advise_delete_window(&self, info: &WindowInfo) {
        self.inner.advise_delete_window(info);
        let id = info.id;
        self.ui.post_or_log("window removal", move |shell| shell.window_removed(id));
    }

    fn advise_focus_lost(&self, info: &WindowInfo) {
        self.inner.advise_focus_lost(info);
        let id = info.id;
        self.ui.post_or_log("focus change", move |shell| shell.focus_changed(id, false));
    }

    fn advise_focus_gained(&self, info: &WindowInfo) {
        self.inner.advise_focus_gained(info);
        let id = info.id;
        self.ui.post_or_log("focus change", move |shell| shell.focus_changed(id, true));
    }

    fn advise_state_change(&self, info: &WindowInfo, state: CompositorWindowState) {
        self.inner.advise_state_change(info, state);
        // The inner policy may have kept a placeholder state
        let state = extra_info(info)
            .map(|extra| extra.state())
            .unwrap_or_else(|| WindowState::from_compositor(state));
        let id = info.id;
        self.ui.post_or_log("state change", move |shell| shell.window_state_changed(id, state));
    }

    fn advise_move_to(&self, info: &WindowInfo, top_left: Point) {
        self.inner.advise_move_to(info, top_left);
        let id = info.id;
        self.ui.post_or_log("window move", move |shell| shell.window_moved(id, top_left));
    }

    fn advise_resize(&self, info: &WindowInfo, size: Size) {
        self.inner.advise_resize(info, size);
    }

    fn advise_raise(&self, windows: &[WindowId]) {
        self.inner.advise_raise(windows);
        let windows = windows.to_vec();
        self.ui.post_or_log("raise", move |shell| shell.windows_raised(&windows));
    }

    fn advise_adding_to_workspace(&self, workspace: WorkspaceId, windows: &[WindowId]) {
        self.inner.advise_adding_to_workspace(workspace, windows);
    }

    fn advise_removing_from_workspace(&self, workspace: WorkspaceId, windows: &[WindowId]) {
        self.inner.advise_removing_from_workspace(workspace, windows);
    }

    fn advise_output_create(&self, output: &OutputConfiguration) {
        self.inner.advise_output_create(output);
    }

    fn advise_output_update(&self, updated: &OutputConfiguration, original: &OutputConfiguration) {
        self.inner.advise_output_update(updated, original);
    }

    fn advise_output_delete(&self, output: &OutputConfiguration) {
        self.inner.advise_output_delete(output);
    }

    fn handle_request_move(&self, info: &WindowInfo) {
        self.inner.handle_request_move(info);
    }

    fn handle_request_resize(&self, info: &WindowInfo) {
        self.inner.handle_request_resize(info);
    }

    fn handle_request_drag_and_drop(&self, info: &WindowInfo) {
        self.inner.handle_request_drag_and_drop(info);
    }
}
