//! Headless window manager and compositor
//!
//! [`HeadlessWindowManager`] is the compositor's window table. Changes made
//! under its lock queue up as [`Advice`]; [`HeadlessCompositor::flush`]
//! hands that advice to the policy once the lock is released, so policy
//! hooks never run with the table locked.

use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::headless::{HeadlessApplication, HeadlessClient, HeadlessSurface};
use crate::error::{Result, ShellError};
use crate::geometry::{Displacement, Point, Size};
use crate::input::{InputEvent, KeyboardEvent, PointerEvent, TouchEvent};
use crate::logging::{POLICY, SESSIONS};
use crate::policy::{ApplicationInfo, WindowManagementPolicy, WindowManagerTools, WindowTable, WorkspaceId};
use crate::screens::OutputConfiguration;
use crate::session::{ApplicationHandle, ClientSession};
use crate::shell::CompositorAccess;
use crate::surface::{CompositorSurface, FrameObserver};
use crate::window::{CompositorWindowState, WindowId, WindowInfo, WindowSpecification};

/// Size given to windows that did not ask for one
pub const DEFAULT_WINDOW_SIZE: Size = Size::new(640, 480);

/// A change the policy has yet to hear about
#[derive(Debug, Clone)]
pub enum Advice {
    FocusLost(WindowInfo),
    FocusGained(WindowInfo),
    StateChanged(WindowInfo, CompositorWindowState),
    Moved(WindowInfo, Point),
    Resized(WindowInfo, Size),
    Raised(Vec<WindowId>),
    AddedToWorkspace(WorkspaceId, Vec<WindowId>),
    RemovedFromWorkspace(WorkspaceId, Vec<WindowId>),
    Deleted(WindowInfo),
}

#[derive(Debug, Default)]
pub struct HeadlessTable {
    windows: BTreeMap<WindowId, WindowInfo>,
    /// Bottom to top
    stacking: Vec<WindowId>,
    active: Option<WindowId>,
    workspaces: BTreeMap<WorkspaceId, Vec<WindowId>>,
    close_requests: Vec<WindowId>,
    advice: Vec<Advice>,
}

impl HeadlessTable {
    fn get(&self, window: WindowId) -> Result<&WindowInfo> {
        self.windows.get(&window).ok_or(ShellError::WindowNotFound(window))
    }

    /// `window` followed by all its descendants
    fn tree(&self, window: WindowId) -> Vec<WindowId> {
        let mut tree = vec![window];
        let mut index = 0;
        while index < tree.len() {
            if let Some(info) = self.windows.get(&tree[index]) {
                tree.extend(info.children.iter().copied());
            }
            index += 1;
        }
        tree
    }

    fn remove(&mut self, window: WindowId) -> Option<WindowInfo> {
        let info = self.windows.remove(&window)?;
        self.stacking.retain(|w| *w != window);
        for members in self.workspaces.values_mut() {
            members.retain(|w| *w != window);
        }
        if let Some(parent) = info.parent.and_then(|p| self.windows.get_mut(&p)) {
            parent.children.retain(|w| *w != window);
        }
        if self.active == Some(window) {
            self.active = None;
        }
        self.advice.push(Advice::Deleted(info.clone()));
        Some(info)
    }
}

impl WindowTable for HeadlessTable {
    fn info(&self, window: WindowId) -> Result<WindowInfo> {
        self.get(window).cloned()
    }

    fn active_window(&self) -> Option<WindowId> {
        self.active
    }

    fn select_active_window(&mut self, window: WindowId) -> Option<WindowId> {
        let Some(info) = self.windows.get(&window).cloned() else {
            return self.active;
        };
        if self.active == Some(window) {
            return self.active;
        }
        if let Some(previous) = self.active.and_then(|w| self.windows.get(&w)).cloned() {
            self.advice.push(Advice::FocusLost(previous));
        }
        self.active = Some(window);
        self.advice.push(Advice::FocusGained(info));
        self.active
    }

    fn modify_window(&mut self, window: WindowId, modifications: &WindowSpecification) -> Result<()> {
        let info = self.windows.get_mut(&window).ok_or(ShellError::WindowNotFound(window))?;
        let mut advice = Vec::new();

        if let Some(name) = &modifications.name {
            info.name = name.clone();
        }
        if let Some(window_type) = modifications.window_type {
            info.window_type = window_type;
        }
        if let Some(min_size) = modifications.min_size {
            info.min_size = min_size;
        }
        if let Some(max_size) = modifications.max_size {
            info.max_size = max_size;
        }
        if let Some(chrome) = modifications.shell_chrome {
            info.shell_chrome = chrome;
        }
        if let Some(state) = modifications.state.filter(|s| *s != info.state) {
            info.state = state;
            advice.push(Advice::StateChanged(info.clone(), state));
        }
        if let Some(top_left) = modifications.top_left.filter(|p| *p != info.top_left) {
            info.top_left = top_left;
            advice.push(Advice::Moved(info.clone(), top_left));
        }
        if let Some(size) = modifications.size.filter(|s| *s != info.size) {
            info.size = size;
            advice.push(Advice::Resized(info.clone(), size));
        }

        self.advice.extend(advice);
        Ok(())
    }

    fn raise_tree(&mut self, window: WindowId) -> Result<()> {
        self.get(window)?;
        let tree = self.tree(window);
        self.stacking.retain(|w| !tree.contains(w));
        self.stacking.extend(tree.iter().copied());
        self.advice.push(Advice::Raised(tree));
        Ok(())
    }

    fn ask_client_to_close(&mut self, window: WindowId) -> Result<()> {
        self.get(window)?;
        self.close_requests.push(window);
        Ok(())
    }

    fn force_close(&mut self, window: WindowId) -> Result<()> {
        self.get(window)?;
        for member in self.tree(window).into_iter().rev() {
            self.remove(member);
        }
        Ok(())
    }

    fn workspaces_containing(&self, window: WindowId) -> Vec<WorkspaceId> {
        self.workspaces
            .iter()
            .filter(|(_, members)| members.contains(&window))
            .map(|(id, _)| *id)
            .collect()
    }

    fn windows_in_workspace(&self, workspace: WorkspaceId) -> Vec<WindowId> {
        self.workspaces.get(&workspace).cloned().unwrap_or_default()
    }

    fn add_tree_to_workspace(&mut self, window: WindowId, workspace: WorkspaceId) -> Result<()> {
        self.get(window)?;
        let tree = self.tree(window);
        let members = self.workspaces.entry(workspace).or_default();
        let added: Vec<_> = tree.into_iter().filter(|w| !members.contains(w)).collect();
        members.extend(added.iter().copied());
        if !added.is_empty() {
            self.advice.push(Advice::AddedToWorkspace(workspace, added));
        }
        Ok(())
    }

    fn remove_tree_from_workspace(&mut self, window: WindowId, workspace: WorkspaceId) -> Result<()> {
        self.get(window)?;
        let tree = self.tree(window);
        let Some(members) = self.workspaces.get_mut(&workspace) else {
            return Ok(());
        };
        let removed: Vec<_> = tree.into_iter().filter(|w| members.contains(w)).collect();
        members.retain(|w| !removed.contains(w));
        if !removed.is_empty() {
            self.advice.push(Advice::RemovedFromWorkspace(workspace, removed));
        }
        Ok(())
    }

    fn move_workspace_content_to_workspace(&mut self, to: WorkspaceId, from: WorkspaceId) {
        if to == from {
            return;
        }
        let moved = self.workspaces.remove(&from).unwrap_or_default();
        if moved.is_empty() {
            return;
        }
        self.advice.push(Advice::RemovedFromWorkspace(from, moved.clone()));
        let members = self.workspaces.entry(to).or_default();
        let added: Vec<_> = moved.into_iter().filter(|w| !members.contains(w)).collect();
        members.extend(added.iter().copied());
        self.advice.push(Advice::AddedToWorkspace(to, added));
    }
}

/// The compositor's window table plus input delivery to clients
#[derive(Debug, Default)]
pub struct HeadlessWindowManager {
    table: Mutex<HeadlessTable>,
    dispatched: Mutex<Vec<(WindowId, InputEvent)>>,
    lock_count: AtomicUsize,
}

impl HeadlessWindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_window(&self, info: WindowInfo) {
        let mut table = self.table.lock();
        if let Some(parent) = info.parent.and_then(|p| table.windows.get_mut(&p)) {
            if !parent.children.contains(&info.id) {
                parent.children.push(info.id);
            }
        }
        table.stacking.push(info.id);
        table.windows.insert(info.id, info);
    }

    /// Removes a window and its descendants, children first
    pub fn remove_window(&self, window: WindowId) -> Vec<WindowInfo> {
        let mut table = self.table.lock();
        let tree = table.tree(window);
        tree.into_iter().rev().filter_map(|w| table.remove(w)).collect()
    }

    pub fn window(&self, window: WindowId) -> Option<WindowInfo> {
        self.table.lock().windows.get(&window).cloned()
    }

    pub fn windows(&self) -> Vec<WindowId> {
        self.table.lock().windows.keys().copied().collect()
    }

    pub fn windows_of(&self, pid: u32) -> Vec<WindowId> {
        self.table
            .lock()
            .windows
            .values()
            .filter(|info| info.client_pid == pid)
            .map(|info| info.id)
            .collect()
    }

    pub fn active_window(&self) -> Option<WindowId> {
        self.table.lock().active
    }

    pub fn stacking(&self) -> Vec<WindowId> {
        self.table.lock().stacking.clone()
    }

    pub fn close_requests(&self) -> Vec<WindowId> {
        self.table.lock().close_requests.clone()
    }

    pub fn take_advice(&self) -> Vec<Advice> {
        std::mem::take(&mut self.table.lock().advice)
    }

    pub fn dispatched(&self) -> Vec<(WindowId, InputEvent)> {
        self.dispatched.lock().clone()
    }

    /// How many times the table was locked for the policy
    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::SeqCst)
    }
}

impl WindowManagerTools for HeadlessWindowManager {
    fn invoke_under_lock(&self, f: &mut dyn FnMut(&mut dyn WindowTable)) {
        let mut table = self.table.lock();
        self.lock_count.fetch_add(1, Ordering::SeqCst);
        f(&mut *table);
    }

    fn info_for(&self, window: WindowId) -> Result<WindowInfo> {
        self.table.lock().info(window)
    }

    fn id_for_window(&self, window: WindowId) -> String {
        format!("headless-{}", window.0)
    }

    fn dispatch_input_event(&self, window: WindowId, event: InputEvent) {
        self.dispatched.lock().push((window, event));
    }
}

struct Client {
    info: ApplicationInfo,
    session: Arc<HeadlessClient>,
    application: Arc<HeadlessApplication>,
}

/// Drives clients, windows and outputs, and reports them to the policy the
/// way a compositor would
pub struct HeadlessCompositor {
    windows: Arc<HeadlessWindowManager>,
    policy: Arc<dyn WindowManagementPolicy>,
    frames: Arc<dyn FrameObserver>,
    next_window: AtomicU64,
    surfaces: Mutex<HashMap<WindowId, Arc<HeadlessSurface>>>,
    clients: Mutex<HashMap<u32, Client>>,
}

impl HeadlessCompositor {
    pub fn new(
        windows: Arc<HeadlessWindowManager>,
        policy: Arc<dyn WindowManagementPolicy>,
        frames: Arc<dyn FrameObserver>,
    ) -> Self {
        Self {
            windows,
            policy,
            frames,
            next_window: AtomicU64::new(1),
            surfaces: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn windows(&self) -> &Arc<HeadlessWindowManager> {
        &self.windows
    }

    pub fn connect(&self, name: &str, pid: u32) -> ApplicationInfo {
        let info = ApplicationInfo {
            pid,
            name: name.to_string(),
        };
        info!(target: SESSIONS, "Client {} connected (pid {})", name, pid);
        self.clients.lock().insert(
            pid,
            Client {
                info: info.clone(),
                session: Arc::new(HeadlessClient::new(name, pid)),
                application: Arc::new(HeadlessApplication::new(name)),
            },
        );
        self.policy.advise_new_app(&info);
        info
    }

    /// The client process exited. Its windows go with it.
    pub fn disconnect(&self, pid: u32) {
        let Some(client) = self.clients.lock().remove(&pid) else {
            return;
        };
        for window in self.windows.windows_of(pid) {
            self.close_window(window);
        }
        info!(target: SESSIONS, "Client {} disconnected", client.info.name);
        self.policy.advise_delete_app(&client.info);
    }

    pub fn headless_client(&self, pid: u32) -> Option<Arc<HeadlessClient>> {
        self.clients.lock().get(&pid).map(|c| c.session.clone())
    }

    pub fn headless_application(&self, pid: u32) -> Option<Arc<HeadlessApplication>> {
        self.clients.lock().get(&pid).map(|c| c.application.clone())
    }

    pub fn surface(&self, window: WindowId) -> Option<Arc<HeadlessSurface>> {
        self.surfaces.lock().get(&window).cloned()
    }

    /// A client creates a window. Returns `None` for unknown clients.
    pub fn open_window(&self, pid: u32, request: &WindowSpecification) -> Option<WindowId> {
        let app = self.clients.lock().get(&pid).map(|c| c.info.clone())?;
        let placement = self.policy.place_new_window(&app, request);
        let spec = placement.spec;

        let id = WindowId(self.next_window.fetch_add(1, Ordering::Relaxed));
        let mut info = WindowInfo::new(id, pid);
        info.name = spec.name.unwrap_or_default();
        info.window_type = spec.window_type.unwrap_or_default();
        info.state = spec.state.unwrap_or(CompositorWindowState::Restored);
        info.size = spec.size.filter(Size::is_valid).unwrap_or(DEFAULT_WINDOW_SIZE);
        info.top_left = spec.top_left.unwrap_or_default();
        if let Some(min_size) = spec.min_size {
            info.min_size = min_size;
        }
        if let Some(max_size) = spec.max_size {
            info.max_size = max_size;
        }
        info.shell_chrome = spec.shell_chrome.unwrap_or_default();
        info.parent = spec.parent;
        info.extra = Some(placement.extra);

        let surface = Arc::new(HeadlessSurface::new(info.size));
        surface.set_top_left(info.top_left);
        if let Some(parent) = info.parent.and_then(|p| self.windows.window(p)) {
            surface.set_parent_top_left(Some(parent.top_left));
        }
        self.surfaces.lock().insert(id, surface);
        self.windows.insert_window(info.clone());
        debug!(target: POLICY, "{}: opened for pid {}", id, pid);

        self.policy.advise_begin();
        self.policy.advise_new_window(&info);
        self.policy.advise_end();
        Some(id)
    }

    /// The client's first frame is up
    pub fn window_ready(&self, window: WindowId) {
        if let Some(info) = self.windows.window(window) {
            self.policy.handle_window_ready(&info);
        }
    }

    /// The client submits a frame
    pub fn post_frame(&self, window: WindowId) {
        if let Some(surface) = self.surface(window) {
            surface.post_frame();
            self.frames.frames_posted(window);
        }
    }

    /// The client asks for changes to its own window
    pub fn client_modify(&self, window: WindowId, request: &WindowSpecification) {
        let Some(info) = self.windows.window(window) else {
            return;
        };
        let allowed = self.policy.handle_modify_window(&info, request);
        if allowed.is_empty() {
            return;
        }
        let mut result = Ok(());
        self.windows
            .invoke_under_lock(&mut |table| result = table.modify_window(window, &allowed));
        if let Err(e) = result {
            debug!(target: POLICY, "{}: client modification dropped: {}", window, e);
        }
        self.flush();
    }

    pub fn client_raise(&self, window: WindowId) {
        if let Some(info) = self.windows.window(window) {
            self.policy.handle_raise_window(&info);
        }
    }

    /// Moves a window; its children follow as far as the policy lets them
    pub fn move_window(&self, window: WindowId, top_left: Point) {
        let Some(info) = self.windows.window(window) else {
            return;
        };
        let movement = Displacement::between(info.top_left, top_left);
        let children: Vec<WindowInfo> = info.children.iter().filter_map(|c| self.windows.window(*c)).collect();

        let mut placements = vec![(window, top_left)];
        for child in &children {
            let confirmed = self.policy.confirm_inherited_move(child, movement);
            placements.push((child.id, confirmed.top_left()));
        }

        self.windows.invoke_under_lock(&mut |table| {
            for (id, top_left) in &placements {
                let modifications = WindowSpecification {
                    top_left: Some(*top_left),
                    ..Default::default()
                };
                let _ = table.modify_window(*id, &modifications);
            }
        });

        for (id, top_left) in &placements {
            if let Some(surface) = self.surface(*id) {
                surface.set_top_left(*top_left);
            }
        }
        for child in &children {
            if let Some(surface) = self.surface(child.id) {
                surface.set_parent_top_left(Some(top_left));
            }
        }
        self.flush();
    }

    /// The client destroyed a window, or the compositor dropped it
    pub fn close_window(&self, window: WindowId) {
        for info in self.windows.remove_window(window) {
            self.surfaces.lock().remove(&info.id);
        }
        self.flush();
    }

    /// Honors the close requests collected so far, like well-behaved
    /// clients would
    pub fn honour_close_requests(&self) {
        let requests = std::mem::take(&mut self.windows.table.lock().close_requests);
        for window in requests {
            self.close_window(window);
        }
    }

    pub fn keyboard(&self, event: &KeyboardEvent) -> bool {
        self.policy.handle_keyboard_event(event)
    }

    pub fn pointer(&self, event: &PointerEvent) -> bool {
        self.policy.handle_pointer_event(event)
    }

    pub fn touch(&self, event: &TouchEvent) -> bool {
        self.policy.handle_touch_event(event)
    }

    pub fn output_created(&self, output: &OutputConfiguration) {
        self.policy.advise_output_create(output);
    }

    pub fn output_updated(&self, updated: &OutputConfiguration, original: &OutputConfiguration) {
        self.policy.advise_output_update(updated, original);
    }

    pub fn output_deleted(&self, output: &OutputConfiguration) {
        self.policy.advise_output_delete(output);
    }

    /// Tells the policy about every change made under the table lock
    pub fn flush(&self) {
        let advice = self.windows.take_advice();
        if advice.is_empty() {
            return;
        }

        self.policy.advise_begin();
        for item in advice {
            match item {
                Advice::FocusLost(info) => self.policy.advise_focus_lost(&info),
                Advice::FocusGained(info) => self.policy.advise_focus_gained(&info),
                Advice::StateChanged(info, state) => self.policy.advise_state_change(&info, state),
                Advice::Moved(info, top_left) => self.policy.advise_move_to(&info, top_left),
                Advice::Resized(info, size) => {
                    // The client redraws at the new size
                    if let Some(surface) = self.surface(info.id) {
                        surface.set_buffer_size(size);
                    }
                    self.policy.advise_resize(&info, size)
                }
                Advice::Raised(windows) => self.policy.advise_raise(&windows),
                Advice::AddedToWorkspace(workspace, windows) => {
                    self.policy.advise_adding_to_workspace(workspace, &windows)
                }
                Advice::RemovedFromWorkspace(workspace, windows) => {
                    self.policy.advise_removing_from_workspace(workspace, &windows)
                }
                Advice::Deleted(info) => self.policy.advise_delete_window(&info),
            }
        }
        self.policy.advise_end();
    }
}

impl CompositorAccess for HeadlessCompositor {
    fn compositor_surface(&self, window: WindowId) -> Option<Arc<dyn CompositorSurface>> {
        self.surface(window).map(|s| s as Arc<dyn CompositorSurface>)
    }

    fn client(&self, pid: u32) -> Option<Arc<dyn ClientSession>> {
        self.headless_client(pid).map(|c| c as Arc<dyn ClientSession>)
    }

    fn application(&self, pid: u32) -> Option<Arc<dyn ApplicationHandle>> {
        self.headless_application(pid).map(|a| a as Arc<dyn ApplicationHandle>)
    }
}
