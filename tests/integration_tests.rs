//! Integration tests for tessera
//!
//! These drive the shell end to end through the headless compositor: client
//! and window lifecycle, the compositor to UI queue, input focus, the frame
//! pump and confinement of inherited moves.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tessera::backend::HeadlessStack;
use tessera::clock::ManualClock;
use tessera::geometry::{Point, Rect, Size};
use tessera::session::SessionState;
use tessera::shell::UiLoop;
use tessera::signals::{SessionSignal, ShellEvent, SurfaceSignal};
use tessera::window::{WindowId, WindowSpecification, WindowType};
use tessera::{Shell, ShellConfig};

struct Harness {
    clock: Arc<ManualClock>,
    stack: HeadlessStack,
    shell: Shell,
    ui_loop: UiLoop,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ShellConfig::default())
    }

    fn with_config(config: ShellConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let (stack, shell, ui_loop) = HeadlessStack::new(&config, clock.clone());
        Self {
            clock,
            stack,
            shell,
            ui_loop,
        }
    }

    /// Runs everything the compositor side queued for the UI thread
    fn pump(&mut self) {
        self.ui_loop.run_pending(&mut self.shell);
    }

    fn open(&mut self, pid: u32, spec: WindowSpecification) -> WindowId {
        let window = self.stack.compositor.open_window(pid, &spec).unwrap();
        self.pump();
        window
    }

    fn open_ready(&mut self, pid: u32) -> WindowId {
        let window = self.open(pid, normal());
        self.stack.compositor.window_ready(window);
        self.pump();
        window
    }

    fn surface_signals(&self, window: WindowId) -> Vec<SurfaceSignal> {
        self.stack
            .drain_signals()
            .into_iter()
            .filter_map(|event| match event {
                ShellEvent::Surface(id, signal) if id == window => Some(signal),
                _ => None,
            })
            .collect()
    }
}

fn normal() -> WindowSpecification {
    WindowSpecification {
        window_type: Some(WindowType::Normal),
        ..Default::default()
    }
}

#[test]
fn test_surface_invisible_until_first_frame() {
    let mut h = Harness::new();
    h.stack.compositor.connect("editor", 1);
    let window = h.open(1, normal());

    // The compositor already reports the window as visible
    let surface = h.shell.surface(window).unwrap();
    assert!(!surface.visible());

    h.stack.compositor.window_ready(window);
    h.pump();
    assert!(surface.visible());
}

#[test]
fn test_session_runs_once_a_surface_is_ready() {
    let mut h = Harness::new();
    h.stack.compositor.connect("editor", 1);
    h.pump();
    let session = h.shell.session(1).unwrap();
    assert_eq!(session.state(), SessionState::Starting);

    let window = h.open(1, normal());
    assert_eq!(session.state(), SessionState::Starting);

    h.stack.compositor.window_ready(window);
    h.pump();
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.surfaces().len(), 1);
}

#[test]
fn test_blank_surface_listed_behind_ready_prompt() {
    let mut h = Harness::new();
    h.stack.compositor.connect("installer", 1);
    h.stack.compositor.connect("password-prompt", 2);
    h.pump();
    let parent = h.shell.session(1).unwrap();
    let child = h.shell.session(2).unwrap();

    let blank = h.open(1, normal());
    assert!(parent.surfaces().is_empty());

    parent.add_child_session(child.clone());
    h.open_ready(2);

    let listed = parent.surfaces();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), blank);
    assert!(!listed[0].is_ready());
}

#[test]
fn test_frame_pump_with_nothing_pending_is_a_no_op() {
    let mut h = Harness::new();
    h.stack.compositor.connect("video", 1);
    let window = h.open_ready(1);
    h.stack.dispatcher.compositor_starting();
    h.stack.compositor.post_frame(window);
    h.pump();
    assert_eq!(h.shell.render(1), 1);

    let surface = h.shell.surface(window).unwrap();
    let frame = surface.current_frame_number(1);
    let acquired = h.stack.compositor.surface(window).unwrap().acquired();
    h.stack.drain_signals();

    surface.start_frame_dropper();
    surface.drop_pending_buffer();

    assert!(!surface.frame_dropper_running());
    assert_eq!(surface.current_frame_number(1), frame);
    assert_eq!(h.stack.compositor.surface(window).unwrap().acquired(), acquired);
    assert!(h.surface_signals(window).is_empty());
}

#[test]
fn test_frame_dropper_releases_unrendered_frames() {
    let mut h = Harness::new();
    h.stack.compositor.connect("video", 1);
    let window = h.open_ready(1);
    h.stack.dispatcher.compositor_starting();
    h.stack.compositor.post_frame(window);
    h.pump();
    h.shell.render(1);

    // Two more frames arrive but the renderer stalls
    h.stack.compositor.post_frame(window);
    h.stack.compositor.post_frame(window);
    h.pump();
    let surface = h.shell.surface(window).unwrap();
    h.stack.drain_signals();

    surface.drop_pending_buffer();
    assert!(surface.frame_dropper_running());
    surface.drop_pending_buffer();
    surface.drop_pending_buffer();

    assert!(!surface.frame_dropper_running());
    assert_eq!(surface.num_buffers_ready_for_compositor(1), 0);
    let dropped = h
        .surface_signals(window)
        .into_iter()
        .filter(|s| *s == SurfaceSignal::FrameDropped)
        .count();
    assert_eq!(dropped, 2);
}

#[test]
fn test_close_is_idempotent() {
    let mut h = Harness::new();
    h.stack.compositor.connect("editor", 1);
    let window = h.open_ready(1);
    let surface = h.shell.surface(window).unwrap();
    h.stack.drain_signals();

    surface.close();
    surface.close();

    let requested = h
        .surface_signals(window)
        .into_iter()
        .filter(|s| *s == SurfaceSignal::CloseRequested)
        .count();
    assert_eq!(requested, 1);
    assert_eq!(surface.close_timer_starts(), 1);
    assert_eq!(h.stack.windows.close_requests(), vec![window]);
}

#[test]
fn test_ignored_close_request_terminates_application() {
    let mut h = Harness::new();
    h.stack.compositor.connect("stubborn", 1);
    let window = h.open_ready(1);
    let surface = h.shell.surface(window).unwrap();

    surface.close();
    h.clock.advance(Duration::from_millis(2999));
    h.shell.poll_timers();
    assert_eq!(h.stack.compositor.headless_application(1).unwrap().terminate_count(), 0);

    h.clock.advance(Duration::from_millis(1));
    h.shell.poll_timers();
    assert_eq!(h.stack.compositor.headless_application(1).unwrap().terminate_count(), 1);
}

#[test]
fn test_disconnecting_root_destroys_session_tree() {
    let mut h = Harness::new();
    for (pid, name) in [(1, "shell-app"), (2, "helper"), (3, "helper-prompt")] {
        h.stack.compositor.connect(name, pid);
    }
    h.pump();
    let root = h.shell.session(1).unwrap();
    let child = h.shell.session(2).unwrap();
    let grandchild = h.shell.session(3).unwrap();
    root.add_child_session(child.clone());
    child.add_child_session(grandchild.clone());
    h.stack.drain_signals();

    h.stack.compositor.disconnect(1);
    h.pump();

    let mut destroyed: Vec<_> = h
        .stack
        .drain_signals()
        .into_iter()
        .filter_map(|event| match event {
            ShellEvent::Session(id, SessionSignal::Destroyed) => Some(id),
            _ => None,
        })
        .collect();
    destroyed.sort();
    let mut expected = vec![root.id(), child.id(), grandchild.id()];
    expected.sort();
    assert_eq!(destroyed, expected);
    assert!(child.is_destroyed());
    assert!(grandchild.is_destroyed());
}

#[test]
fn test_inherited_move_is_confined() {
    let mut config = ShellConfig::default();
    config.policy.confinement_regions = vec![Rect::new(0, 0, 1000, 800)];
    let mut h = Harness::with_config(config);
    h.stack.compositor.connect("editor", 1);
    let parent = h.open_ready(1);

    // A dialog already hanging over the right edge
    let child = h.open(
        1,
        WindowSpecification {
            window_type: Some(WindowType::Dialog),
            parent: Some(parent),
            top_left: Some(Point::new(950, 100)),
            size: Some(Size::new(100, 100)),
            ..Default::default()
        },
    );

    h.stack.compositor.move_window(parent, Point::new(30, 0));
    assert_eq!(h.stack.windows.window(child).unwrap().top_left, Point::new(950, 100));

    h.stack.compositor.move_window(parent, Point::new(0, 0));
    assert_eq!(h.stack.windows.window(child).unwrap().top_left, Point::new(920, 100));

    h.pump();
    assert_eq!(h.shell.surface(parent).unwrap().position(), Point::new(0, 0));
}

#[test]
fn test_move_to_workspace_takes_whole_tree() {
    let mut h = Harness::new();
    h.stack.compositor.connect("editor", 1);
    let parent = h.open_ready(1);
    let child = h.open(
        1,
        WindowSpecification {
            window_type: Some(WindowType::Dialog),
            parent: Some(parent),
            ..Default::default()
        },
    );

    h.stack.policy.move_window_to_workspace(parent, 1);
    h.stack.policy.move_window_to_workspace(child, 2);

    assert!(h.stack.policy.windows_in_workspace(1).is_empty());
    let mut members = h.stack.policy.windows_in_workspace(2);
    members.sort();
    assert_eq!(members, vec![parent, child]);
}

#[test]
fn test_compositor_thread_drives_ui_loop() {
    let Harness {
        stack,
        mut shell,
        ui_loop,
        ..
    } = Harness::new();
    let ui = stack.ui.clone();

    let compositor = thread::spawn(move || {
        stack.compositor.connect("terminal", 7);
        let window = stack.compositor.open_window(7, &normal()).unwrap();
        stack.compositor.window_ready(window);
        stack.dispatcher.compositor_starting();
        for _ in 0..5 {
            stack.compositor.post_frame(window);
        }

        let visible = ui
            .blocking_handoff(
                move |shell| shell.surface(window).map(|s| s.visible()),
                Duration::from_secs(5),
            )
            .unwrap();

        stack.compositor.disconnect(7);
        stack.dispatcher.compositor_stopping(Duration::from_secs(5)).unwrap();
        ui.quit().unwrap();
        visible
    });

    ui_loop.run(&mut shell, Duration::from_millis(5));

    assert_eq!(compositor.join().unwrap(), Some(true));
    assert_eq!(shell.surface_count(), 0);
    assert!(shell.sessions().is_empty());
    assert!(!shell.screens().is_compositing());
}
