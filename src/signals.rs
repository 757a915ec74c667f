//! UI-facing signals
//!
//! Every state machine in the crate publishes its changes as a
//! [`ShellEvent`] through an [`EventSink`]. Delivery is queued and
//! best-effort: emitters never block, and ordering is only preserved per
//! emitter. Nothing reads these events back to make decisions.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::debug;

use crate::geometry::{Point, Rect, Size};
use crate::policy::WorkspaceId;
use crate::screens::ScreenId;
use crate::session::{SessionId, SessionState};
use crate::surface::CursorShape;
use crate::window::{ShellChrome, WindowId, WindowState, WindowType};

/// Changes published by a surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceSignal {
    Ready,
    LiveChanged(bool),
    VisibleChanged(bool),
    FocusedChanged(bool),
    ActiveFocusChanged(bool),
    FocusRequested,
    CloseRequested,
    StateChanged(WindowState),
    SizeChanged(Size),
    PositionChanged(Point),
    RequestedPositionChanged(Point),
    NameChanged(String),
    TypeChanged(WindowType),
    MinimumWidthChanged(i32),
    MinimumHeightChanged(i32),
    MaximumWidthChanged(i32),
    MaximumHeightChanged(i32),
    WidthIncrementChanged(i32),
    HeightIncrementChanged(i32),
    CursorChanged(Option<CursorShape>),
    InputBoundsChanged(Rect),
    OrientationAngleChanged(u32),
    KeymapChanged(String),
    ShellChromeChanged(ShellChrome),
    AllowClientResizeChanged(bool),
    IsBeingDisplayedChanged(bool),
    FramesPosted,
    FrameDropped,
}

/// Changes published by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    StateChanged(SessionState),
    FocusedChanged(bool),
    FullscreenChanged(bool),
    LiveChanged(bool),
    SurfaceListChanged(usize),
    ChildAdded(SessionId),
    ChildRemoved(SessionId),
    Destroyed,
}

/// Changes to the set of screens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenSignal {
    Added(ScreenId),
    AboutToBeRemoved(ScreenId),
    Removed(ScreenId),
}

/// Window model notifications relayed from the policy
#[derive(Debug, Clone, PartialEq)]
pub enum WindowModelSignal {
    ModificationsStarted,
    ModificationsEnded,
    WindowAdded(WindowId),
    WindowRemoved(WindowId),
    WindowReady(WindowId),
    WindowMoved(WindowId, Point),
    WindowResized(WindowId, Size),
    WindowStateChanged(WindowId, WindowState),
    WindowFocusChanged(WindowId, bool),
    WindowsRaised(Vec<WindowId>),
    WindowRequestedRaise(WindowId),
    WindowsAddedToWorkspace(WorkspaceId, Vec<WindowId>),
    WindowsAboutToBeRemovedFromWorkspace(WorkspaceId, Vec<WindowId>),
}

/// Application lifecycle notifications relayed from the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSignal {
    Added(u32),
    Removed(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShellEvent {
    Surface(WindowId, SurfaceSignal),
    Session(SessionId, SessionSignal),
    Screen(ScreenSignal),
    WindowModel(WindowModelSignal),
    App(AppSignal),
}

/// Non-blocking emitter side of the signal queue
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Option<Sender<ShellEvent>>,
}

impl EventSink {
    /// Creates a sink together with the receiving end of its queue
    pub fn channel(capacity: usize) -> (Self, Receiver<ShellEvent>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender: Some(sender) }, receiver)
    }

    /// A sink nobody listens to
    pub fn detached() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: ShellEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!("Signal queue full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn surface(&self, id: WindowId, signal: SurfaceSignal) {
        self.emit(ShellEvent::Surface(id, signal));
    }

    pub fn session(&self, id: SessionId, signal: SessionSignal) {
        self.emit(ShellEvent::Session(id, signal));
    }

    pub fn screen(&self, signal: ScreenSignal) {
        self.emit(ShellEvent::Screen(signal));
    }

    pub fn window_model(&self, signal: WindowModelSignal) {
        self.emit(ShellEvent::WindowModel(signal));
    }

    pub fn app(&self, signal: AppSignal) {
        self.emit(ShellEvent::App(signal));
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::detached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_preserves_order() {
        let (sink, rx) = EventSink::channel(8);
        sink.surface(WindowId(1), SurfaceSignal::Ready);
        sink.surface(WindowId(1), SurfaceSignal::VisibleChanged(true));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ShellEvent::Surface(WindowId(1), SurfaceSignal::Ready),
                ShellEvent::Surface(WindowId(1), SurfaceSignal::VisibleChanged(true)),
            ]
        );
    }

    #[test]
    fn test_full_queue_never_blocks() {
        let (sink, rx) = EventSink::channel(1);
        sink.app(AppSignal::Added(1));
        sink.app(AppSignal::Added(2));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_detached_sink_discards() {
        let sink = EventSink::detached();
        sink.screen(ScreenSignal::Added(ScreenId(0)));
    }
}
