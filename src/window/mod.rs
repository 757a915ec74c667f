//! Window records shared between the policy and the surfaces
//!
//! The compositor owns windows; the shell only ever sees them through
//! [`WindowId`] handles and [`WindowInfo`] snapshots taken under the
//! compositor lock. Shell-specific bookkeeping rides along on each record as
//! an [`ExtraWindowInfo`] attached when the window is placed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::geometry::{Point, Rect, Size};

/// Opaque compositor window handle. Only equality and hashing are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Window type classification as reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    #[default]
    Normal,
    Utility,
    Dialog,
    Gloss,
    Freestyle,
    Menu,
    InputMethod,
    Satellite,
    Tip,
    Decoration,
}

/// Window state as the compositor models it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompositorWindowState {
    #[default]
    Unknown,
    Restored,
    Minimized,
    Maximized,
    VertMaximized,
    HorizMaximized,
    Fullscreen,
    Attached,
    Hidden,
}

/// Window state as the shell models it.
///
/// The half and quarter maximized states have no compositor counterpart and
/// travel to the compositor as `Restored` with an explicit geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    #[default]
    Unknown,
    Restored,
    Minimized,
    Maximized,
    VertMaximized,
    HorizMaximized,
    Fullscreen,
    MaximizedLeft,
    MaximizedRight,
    MaximizedTopLeft,
    MaximizedTopRight,
    MaximizedBottomLeft,
    MaximizedBottomRight,
    Hidden,
}

impl WindowState {
    pub fn to_compositor(self) -> CompositorWindowState {
        match self {
            WindowState::Unknown => CompositorWindowState::Unknown,
            WindowState::Restored
            | WindowState::MaximizedLeft
            | WindowState::MaximizedRight
            | WindowState::MaximizedTopLeft
            | WindowState::MaximizedTopRight
            | WindowState::MaximizedBottomLeft
            | WindowState::MaximizedBottomRight => CompositorWindowState::Restored,
            WindowState::Minimized => CompositorWindowState::Minimized,
            WindowState::Maximized => CompositorWindowState::Maximized,
            WindowState::VertMaximized => CompositorWindowState::VertMaximized,
            WindowState::HorizMaximized => CompositorWindowState::HorizMaximized,
            WindowState::Fullscreen => CompositorWindowState::Fullscreen,
            WindowState::Hidden => CompositorWindowState::Hidden,
        }
    }

    pub fn from_compositor(state: CompositorWindowState) -> Self {
        match state {
            CompositorWindowState::Unknown => WindowState::Unknown,
            CompositorWindowState::Restored | CompositorWindowState::Attached => WindowState::Restored,
            CompositorWindowState::Minimized => WindowState::Minimized,
            CompositorWindowState::Maximized => WindowState::Maximized,
            CompositorWindowState::VertMaximized => WindowState::VertMaximized,
            CompositorWindowState::HorizMaximized => WindowState::HorizMaximized,
            CompositorWindowState::Fullscreen => WindowState::Fullscreen,
            CompositorWindowState::Hidden => WindowState::Hidden,
        }
    }

    /// States the compositor only sees as a `Restored` placeholder
    pub fn is_placeholder(self) -> bool {
        self != WindowState::Restored && self.to_compositor() == CompositorWindowState::Restored
    }

    /// Whether a surface in this state can be shown at all
    pub fn is_shown(self) -> bool {
        !matches!(self, WindowState::Hidden | WindowState::Minimized)
    }
}

/// How much decoration the shell should draw around a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellChrome {
    #[default]
    Normal,
    LowChrome,
}

/// Shell bookkeeping attached to every compositor window record
#[derive(Debug)]
pub struct ExtraWindowInfo {
    inner: Mutex<ExtraState>,
}

#[derive(Debug, Clone)]
struct ExtraState {
    persistent_id: String,
    state: WindowState,
    previous_state: WindowState,
    allow_client_resize: bool,
}

impl ExtraWindowInfo {
    pub fn new(persistent_id: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(ExtraState {
                persistent_id: persistent_id.into(),
                state: WindowState::Unknown,
                previous_state: WindowState::Restored,
                allow_client_resize: true,
            }),
        }
    }

    pub fn persistent_id(&self) -> String {
        self.inner.lock().persistent_id.clone()
    }

    /// The compositor assigns the persistent id once the window exists
    pub fn set_persistent_id(&self, id: impl Into<String>) {
        self.inner.lock().persistent_id = id.into();
    }

    pub fn state(&self) -> WindowState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: WindowState) {
        self.inner.lock().state = state;
    }

    /// State to go back to when a minimized window is activated.
    /// Never `Minimized`.
    pub fn previous_state(&self) -> WindowState {
        self.inner.lock().previous_state
    }

    /// Records `state` as the current state, remembering the one it replaces.
    ///
    /// Returns false when the window already is in `state`. Leaving
    /// `Minimized` never overwrites the remembered state, so a second
    /// minimize keeps the state from before the first one.
    pub fn transition_to(&self, state: WindowState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == state {
            return false;
        }
        if inner.state != WindowState::Minimized && inner.state != WindowState::Unknown {
            inner.previous_state = inner.state;
        }
        inner.state = state;
        true
    }

    pub fn allow_client_resize(&self) -> bool {
        self.inner.lock().allow_client_resize
    }

    pub fn set_allow_client_resize(&self, allow: bool) {
        self.inner.lock().allow_client_resize = allow;
    }
}

/// Snapshot of a compositor window record
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub id: WindowId,
    pub name: String,
    pub window_type: WindowType,
    pub state: CompositorWindowState,
    pub top_left: Point,
    pub size: Size,
    pub min_size: Size,
    pub max_size: Size,
    pub width_increment: i32,
    pub height_increment: i32,
    pub parent: Option<WindowId>,
    pub children: Vec<WindowId>,
    pub client_pid: u32,
    pub shell_chrome: ShellChrome,
    pub confine_pointer: bool,
    pub extra: Option<Arc<ExtraWindowInfo>>,
}

impl WindowInfo {
    pub fn new(id: WindowId, client_pid: u32) -> Self {
        Self {
            id,
            name: String::new(),
            window_type: WindowType::Normal,
            state: CompositorWindowState::Restored,
            top_left: Point::default(),
            size: Size::default(),
            min_size: Size::default(),
            max_size: Size::new(i32::MAX, i32::MAX),
            width_increment: 1,
            height_increment: 1,
            parent: None,
            children: Vec::new(),
            client_pid,
            shell_chrome: ShellChrome::Normal,
            confine_pointer: false,
            extra: None,
        }
    }

    pub fn geometry(&self) -> Rect {
        Rect::from_loc_and_size(self.top_left, self.size)
    }
}

/// Requested changes to a window. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSpecification {
    pub top_left: Option<Point>,
    pub size: Option<Size>,
    pub state: Option<CompositorWindowState>,
    pub name: Option<String>,
    pub window_type: Option<WindowType>,
    pub min_size: Option<Size>,
    pub max_size: Option<Size>,
    pub parent: Option<WindowId>,
    pub shell_chrome: Option<ShellChrome>,
}

impl WindowSpecification {
    pub fn is_empty(&self) -> bool {
        *self == WindowSpecification::default()
    }
}

/// Where and how a new window is created, plus the shell record to attach
#[derive(Debug, Clone)]
pub struct Placement {
    pub spec: WindowSpecification,
    pub extra: Arc<ExtraWindowInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_states() {
        assert!(WindowState::MaximizedLeft.is_placeholder());
        assert!(WindowState::MaximizedBottomRight.is_placeholder());
        assert!(!WindowState::Restored.is_placeholder());
        assert!(!WindowState::Maximized.is_placeholder());
    }

    #[test]
    fn test_double_minimize_keeps_previous_state() {
        let extra = ExtraWindowInfo::new("p1");
        extra.set_state(WindowState::Maximized);

        assert!(extra.transition_to(WindowState::Minimized));
        assert_eq!(extra.previous_state(), WindowState::Maximized);

        assert!(!extra.transition_to(WindowState::Minimized));
        assert_eq!(extra.previous_state(), WindowState::Maximized);

        assert!(extra.transition_to(WindowState::Fullscreen));
        assert_eq!(extra.previous_state(), WindowState::Maximized);
    }

    #[test]
    fn test_window_id_display() {
        assert_eq!(WindowId(7).to_string(), "window-7");
    }
}
