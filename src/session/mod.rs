//! Session state machine
//!
//! A [`Session`] is one client process's connection. Its state is driven by
//! the application (suspend/resume/stop) and by its surfaces becoming ready.
//! Sessions form a tree: trusted helper processes spawned on behalf of a
//! client are child sessions of it.
//!
//! The surface list only holds ready surfaces, with one exception: a blank
//! surface is listed while a child session shows something, so a client
//! blocked behind a trusted prompt is not hidden.
//!
//! Sessions never call into a surface while holding their own lock.

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::clock::{TimeSource, Timer};
use crate::config::SessionConfig;
use crate::logging::SESSIONS;
use crate::signals::{EventSink, SessionSignal};
use crate::surface::Surface;
use crate::window::{WindowId, WindowState};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Session states, ordered by importance. Combining the states of several
/// sessions takes the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped = 0,
    Suspended = 1,
    Suspending = 2,
    Starting = 3,
    Running = 4,
}

impl SessionState {
    /// Whether the client process can act on requests such as a resize
    pub fn is_client_running(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Starting | SessionState::Suspending)
    }
}

/// Lifecycle notifications sent to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    WillSuspend,
    Resumed,
}

pub type PromptSessionId = u64;

/// The compositor's side of a client connection
pub trait ClientSession: Send + Sync {
    fn name(&self) -> String;
    fn pid(&self) -> u32;
    fn set_lifecycle_state(&self, state: LifecycleState);
}

/// Compositor operations on trusted prompt sessions
pub trait PromptSessionManager: Send + Sync {
    fn suspend_prompt_session(&self, prompt: PromptSessionId);
    fn resume_prompt_session(&self, prompt: PromptSessionId);
    fn stop_prompt_session(&self, prompt: PromptSessionId);
}

/// The application a session belongs to
pub trait ApplicationHandle: Send + Sync {
    fn app_id(&self) -> String;
    /// Whether the application is already shutting down
    fn is_closing(&self) -> bool;
    /// Forcibly ends the application process
    fn terminate(&self);
}

/// Collaborators shared by every session of a shell
#[derive(Clone)]
pub struct SessionContext {
    pub prompts: Arc<dyn PromptSessionManager>,
    pub clock: Arc<dyn TimeSource>,
    pub events: EventSink,
    pub config: SessionConfig,
}

struct SessionInner {
    state: SessionState,
    live: bool,
    fullscreen: bool,
    focused: bool,
    had_surface: bool,
    destroyed: bool,
    application: Option<Arc<dyn ApplicationHandle>>,
    parent: Option<Weak<Session>>,
    registered: Vec<Arc<Surface>>,
    listed: Vec<Arc<Surface>>,
    closing: Vec<Arc<Surface>>,
    children: Vec<Arc<Session>>,
    prompt_sessions: Vec<PromptSessionId>,
    suspend_timer: Timer,
}

pub struct Session {
    id: SessionId,
    client: Arc<dyn ClientSession>,
    prompts: Arc<dyn PromptSessionManager>,
    clock: Arc<dyn TimeSource>,
    events: EventSink,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(id: SessionId, client: Arc<dyn ClientSession>, ctx: &SessionContext) -> Arc<Self> {
        info!(target: SESSIONS, "{}: created for {} (pid {})", id, client.name(), client.pid());
        Arc::new(Self {
            id,
            client,
            prompts: ctx.prompts.clone(),
            clock: ctx.clock.clone(),
            events: ctx.events.clone(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Starting,
                live: true,
                fullscreen: false,
                focused: false,
                had_surface: false,
                destroyed: false,
                application: None,
                parent: None,
                registered: Vec::new(),
                listed: Vec::new(),
                closing: Vec::new(),
                children: Vec::new(),
                prompt_sessions: Vec::new(),
                suspend_timer: Timer::single_shot(ctx.config.suspend_timeout()),
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> String {
        self.client.name()
    }

    pub fn pid(&self) -> u32 {
        self.client.pid()
    }

    pub fn client(&self) -> Arc<dyn ClientSession> {
        self.client.clone()
    }

    fn emit(&self, signal: SessionSignal) {
        self.events.session(self.id, signal);
    }

    pub fn application(&self) -> Option<Arc<dyn ApplicationHandle>> {
        self.inner.lock().application.clone()
    }

    pub fn set_application(&self, application: Option<Arc<dyn ApplicationHandle>>) {
        self.inner.lock().application = application;
    }

    pub fn parent(&self) -> Option<Arc<Session>> {
        self.inner.lock().parent.as_ref().and_then(Weak::upgrade)
    }

    // State

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    fn set_state(&self, state: SessionState) {
        let surfaces = {
            let mut inner = self.inner.lock();
            if inner.state == state {
                return;
            }
            inner.state = state;
            inner.registered.clone()
        };
        info!(target: SESSIONS, "{}: state={:?}", self.id, state);
        self.emit(SessionSignal::StateChanged(state));

        for surface in surfaces {
            surface.on_session_state_changed();
        }
    }

    /// The most important state across this session and its descendants
    pub fn combined_state(&self) -> SessionState {
        let (own, children) = {
            let inner = self.inner.lock();
            (inner.state, inner.children.clone())
        };
        children
            .iter()
            .map(|child| child.combined_state())
            .fold(own, SessionState::max)
    }

    pub fn suspend(&self) {
        let (prompts, children) = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Running {
                debug!(target: SESSIONS, "{}: suspend ignored in state {:?}", self.id, inner.state);
                return;
            }
            inner.suspend_timer.start(self.clock.now());
            (inner.prompt_sessions.clone(), inner.children.clone())
        };
        info!(target: SESSIONS, "{}: suspend", self.id);
        self.client.set_lifecycle_state(LifecycleState::WillSuspend);

        for prompt in prompts {
            self.prompts.suspend_prompt_session(prompt);
        }
        for child in children {
            child.suspend();
        }
        self.set_state(SessionState::Suspending);
    }

    /// Completes a suspension once the client had time to react
    pub fn do_suspend(&self) {
        let surfaces = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Suspending {
                return;
            }
            inner.suspend_timer.stop();
            inner.listed.clone()
        };
        if surfaces.is_empty() {
            debug!(target: SESSIONS, "{}: suspending with no surface", self.id);
        }
        for surface in &surfaces {
            surface.stop_frame_dropper();
        }
        self.set_state(SessionState::Suspended);
    }

    pub fn resume(&self) {
        let (was, prompts, children, surfaces) = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Suspending => inner.suspend_timer.stop(),
                SessionState::Suspended => {}
                state => {
                    debug!(target: SESSIONS, "{}: resume ignored in state {:?}", self.id, state);
                    return;
                }
            }
            (
                inner.state,
                inner.prompt_sessions.clone(),
                inner.children.clone(),
                inner.listed.clone(),
            )
        };
        info!(target: SESSIONS, "{}: resume", self.id);

        if was == SessionState::Suspended {
            for surface in &surfaces {
                surface.start_frame_dropper();
            }
        }
        self.client.set_lifecycle_state(LifecycleState::Resumed);
        for prompt in prompts {
            self.prompts.resume_prompt_session(prompt);
        }
        for child in children {
            child.resume();
        }
        self.set_state(SessionState::Running);
    }

    pub fn stop(&self) {
        let (children, surfaces) = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Stopped {
                return;
            }
            inner.suspend_timer.stop();
            (inner.children.clone(), inner.registered.clone())
        };
        info!(target: SESSIONS, "{}: stop", self.id);

        self.stop_prompt_sessions();
        for surface in &surfaces {
            surface.stop_frame_dropper();
        }
        for child in children {
            child.stop();
        }
        self.set_state(SessionState::Stopped);
    }

    pub fn live(&self) -> bool {
        self.inner.lock().live
    }

    /// The client process went away. Closing surfaces die with it.
    pub fn set_live(&self, live: bool) {
        let closing = {
            let mut inner = self.inner.lock();
            if inner.live == live {
                return;
            }
            inner.live = live;
            if !live {
                inner.suspend_timer.stop();
            }
            inner.closing.clone()
        };
        info!(target: SESSIONS, "{}: live={}", self.id, live);
        self.emit(SessionSignal::LiveChanged(live));

        if !live {
            self.set_state(SessionState::Stopped);
            for surface in closing {
                surface.set_live(false);
            }
        }
    }

    pub fn suspend_timer_running(&self) -> bool {
        self.inner.lock().suspend_timer.is_running()
    }

    /// Fires the suspend timer when due. Called from the UI loop.
    pub fn poll_timers(&self, now: Instant) {
        let due = self.inner.lock().suspend_timer.poll(now);
        if due {
            self.do_suspend();
        }
    }

    /// Asks every listed surface to close. They stay listed, and keep
    /// drawing, until the compositor removes them.
    pub fn close(&self) {
        let surfaces = {
            let mut inner = self.inner.lock();
            let surfaces = inner.listed.clone();
            for surface in &surfaces {
                if !inner.closing.iter().any(|s| s.id() == surface.id()) {
                    inner.closing.push(surface.clone());
                }
            }
            surfaces
        };
        info!(target: SESSIONS, "{}: close ({} surfaces)", self.id, surfaces.len());
        for surface in &surfaces {
            surface.close();
        }
    }

    // Surfaces

    pub fn register_surface(self: &Arc<Self>, surface: Arc<Surface>) {
        let ready = surface.is_ready();
        {
            let mut inner = self.inner.lock();
            if inner.registered.iter().any(|s| s.id() == surface.id()) {
                return;
            }
            inner.registered.push(surface.clone());
            inner.had_surface = true;
        }
        debug!(target: SESSIONS, "{}: registered {} (ready={})", self.id, surface.id(), ready);

        if ready {
            self.prepend_listed(surface);
        } else {
            self.update_blank_surfaces();
        }
    }

    /// Forgets a surface the compositor removed. Surfaces still on screen
    /// stay around as closing until their views let go.
    pub fn remove_surface(&self, id: WindowId) {
        let removed = {
            let mut inner = self.inner.lock();
            let Some(index) = inner.registered.iter().position(|s| s.id() == id) else {
                return;
            };
            let surface = inner.registered.remove(index);
            inner.listed.retain(|s| s.id() != id);
            inner.closing.retain(|s| s.id() != id);
            surface
        };
        debug!(target: SESSIONS, "{}: removed {}", self.id, id);

        if removed.is_being_displayed() {
            self.inner.lock().closing.push(removed);
        }
        self.surface_list_changed();
    }

    /// A closing surface is no longer displayed anywhere
    pub fn release_closing_surface(&self, id: WindowId) {
        let mut inner = self.inner.lock();
        inner.closing.retain(|s| s.id() != id);
    }

    pub fn surfaces(&self) -> Vec<Arc<Surface>> {
        self.inner.lock().listed.clone()
    }

    pub fn registered_surfaces(&self) -> Vec<Arc<Surface>> {
        self.inner.lock().registered.clone()
    }

    pub fn has_listed_surfaces(&self) -> bool {
        !self.inner.lock().listed.is_empty()
    }

    /// Ready surfaces of every child session, used for prompt overlays
    pub fn prompt_surfaces(&self) -> Vec<Arc<Surface>> {
        let children = self.inner.lock().children.clone();
        children
            .iter()
            .flat_map(|child| {
                let mut surfaces = child.surfaces();
                surfaces.extend(child.prompt_surfaces());
                surfaces
            })
            .collect()
    }

    pub fn had_surface(&self) -> bool {
        self.inner.lock().had_surface
    }

    pub fn has_closing_surfaces(&self) -> bool {
        !self.inner.lock().closing.is_empty()
    }

    pub fn on_surface_ready(&self, id: WindowId) {
        let surface = {
            let inner = self.inner.lock();
            inner.registered.iter().find(|s| s.id() == id).cloned()
        };
        let Some(surface) = surface else {
            return;
        };

        if self.state() == SessionState::Starting {
            self.set_state(SessionState::Running);
        }
        self.prepend_listed(surface);
    }

    pub fn on_surface_state_changed(&self, _id: WindowId) {
        self.refresh_flags();
    }

    pub fn on_surface_focus_changed(&self, _id: WindowId, _focused: bool) {
        self.refresh_flags();
    }

    fn prepend_listed(&self, surface: Arc<Surface>) {
        {
            let mut inner = self.inner.lock();
            if inner.listed.iter().any(|s| s.id() == surface.id()) {
                return;
            }
            inner.listed.insert(0, surface);
        }
        self.surface_list_changed();
    }

    /// Lists blank surfaces while any child session shows something
    fn update_blank_surfaces(&self) {
        let (registered, children) = {
            let inner = self.inner.lock();
            (inner.registered.clone(), inner.children.clone())
        };
        if !children.iter().any(|child| child.has_listed_surfaces()) {
            return;
        }

        let blank: Vec<_> = registered.into_iter().filter(|s| !s.is_ready() && s.live()).collect();
        let added = {
            let mut inner = self.inner.lock();
            let mut added = false;
            for surface in blank {
                if !inner.listed.iter().any(|s| s.id() == surface.id()) {
                    inner.listed.push(surface);
                    added = true;
                }
            }
            added
        };
        if added {
            self.surface_list_changed();
        }
    }

    fn surface_list_changed(&self) {
        let (count, parent) = {
            let inner = self.inner.lock();
            (inner.listed.len(), inner.parent.as_ref().and_then(Weak::upgrade))
        };
        self.emit(SessionSignal::SurfaceListChanged(count));
        self.refresh_flags();

        if let Some(parent) = parent {
            parent.update_blank_surfaces();
        }
    }

    /// Recomputes the flags derived from listed surfaces
    fn refresh_flags(&self) {
        let listed = self.inner.lock().listed.clone();
        let focused = listed.iter().any(|s| s.focused());
        let fullscreen = listed.iter().any(|s| s.state() == WindowState::Fullscreen);

        let (focus_changed, fullscreen_changed) = {
            let mut inner = self.inner.lock();
            let focus_changed = inner.focused != focused;
            let fullscreen_changed = inner.fullscreen != fullscreen;
            inner.focused = focused;
            inner.fullscreen = fullscreen;
            (focus_changed, fullscreen_changed)
        };
        if focus_changed {
            self.emit(SessionSignal::FocusedChanged(focused));
        }
        if fullscreen_changed {
            self.emit(SessionSignal::FullscreenChanged(fullscreen));
        }
    }

    /// Whether any listed surface has keyboard focus
    pub fn focused(&self) -> bool {
        self.inner.lock().focused
    }

    pub fn active_focus(&self) -> bool {
        let listed = self.inner.lock().listed.clone();
        listed.iter().any(|s| s.active_focus())
    }

    pub fn fullscreen(&self) -> bool {
        self.inner.lock().fullscreen
    }

    // Child sessions

    pub fn add_child_session(self: &Arc<Self>, child: Arc<Session>) {
        let index = self.inner.lock().children.len();
        self.insert_child_session(index, child);
    }

    /// Inserts a child at `index`, clamped to the end of the list
    pub fn insert_child_session(self: &Arc<Self>, index: usize, child: Arc<Session>) {
        info!(target: SESSIONS, "{}: insert child {} at {}", self.id, child.id, index);
        child.inner.lock().parent = Some(Arc::downgrade(self));
        let state = {
            let mut inner = self.inner.lock();
            let index = index.min(inner.children.len());
            inner.children.insert(index, child.clone());
            inner.state
        };
        self.emit(SessionSignal::ChildAdded(child.id));

        // A child joining a parked parent is parked too
        match state {
            SessionState::Suspending | SessionState::Suspended => child.suspend(),
            SessionState::Stopped => child.stop(),
            _ => {}
        }
        self.update_blank_surfaces();
    }

    pub fn remove_child_session(&self, id: SessionId) {
        let removed = {
            let mut inner = self.inner.lock();
            let Some(index) = inner.children.iter().position(|c| c.id == id) else {
                return;
            };
            inner.children.remove(index)
        };
        info!(target: SESSIONS, "{}: remove child {}", self.id, id);
        removed.inner.lock().parent = None;
        self.emit(SessionSignal::ChildRemoved(id));
    }

    pub fn child_sessions(&self) -> Vec<Arc<Session>> {
        self.inner.lock().children.clone()
    }

    pub fn child_session_count(&self) -> usize {
        self.inner.lock().children.len()
    }

    pub fn for_each_child_session<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        for child in self.child_sessions() {
            f(&child);
        }
    }

    // Prompt sessions

    pub fn append_prompt_session(&self, prompt: PromptSessionId) {
        debug!(target: SESSIONS, "{}: append prompt session {}", self.id, prompt);
        self.inner.lock().prompt_sessions.push(prompt);
    }

    pub fn remove_prompt_session(&self, prompt: PromptSessionId) {
        debug!(target: SESSIONS, "{}: remove prompt session {}", self.id, prompt);
        self.inner.lock().prompt_sessions.retain(|p| *p != prompt);
    }

    /// The most recently appended prompt session
    pub fn active_prompt_session(&self) -> Option<PromptSessionId> {
        self.inner.lock().prompt_sessions.last().copied()
    }

    pub fn for_each_prompt_session<F>(&self, mut f: F)
    where
        F: FnMut(PromptSessionId),
    {
        let prompts = self.inner.lock().prompt_sessions.clone();
        for prompt in prompts {
            f(prompt);
        }
    }

    fn stop_prompt_sessions(&self) {
        let prompts = std::mem::take(&mut self.inner.lock().prompt_sessions);
        for prompt in prompts.into_iter().rev() {
            self.prompts.stop_prompt_session(prompt);
        }
    }

    // Teardown

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// Tears down this session and every descendant. Each one signals
    /// `Destroyed` exactly once.
    pub fn destroy(&self) {
        let (children, parent) = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            (std::mem::take(&mut inner.children), inner.parent.take())
        };

        for child in children {
            child.inner.lock().parent = None;
            child.destroy();
        }
        if let Some(parent) = parent.and_then(|p| p.upgrade()) {
            parent.remove_child_session(self.id);
        }

        info!(target: SESSIONS, "{}: destroyed", self.id);
        self.emit(SessionSignal::Destroyed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.destroyed {
            return;
        }
        inner.destroyed = true;
        let surfaces = inner.registered.len();
        if surfaces > 0 {
            warn!(target: SESSIONS, "{}: dropped with {} surfaces", self.id, surfaces);
        }
        self.events.session(self.id, SessionSignal::Destroyed);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("live", &inner.live)
            .field("surfaces", &inner.listed.len())
            .field("children", &inner.children.len())
            .finish()
    }
}
