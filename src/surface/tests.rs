use super::*;
use crate::backend::headless::{
    ControllerCall, HeadlessApplication, HeadlessClient, HeadlessGpu, HeadlessPromptSessions, HeadlessSurface,
    RecordingController,
};
use crate::clock::ManualClock;
use crate::config::{SessionConfig, SurfaceConfig};
use crate::input::{KeyInput, KeyInputKind, KeyboardAction, Modifiers, DEFAULT_EVENT_INFO_CAPACITY};
use crate::session::{SessionContext, SessionId, SessionState};
use crate::signals::ShellEvent;
use crossbeam_channel::Receiver;
use std::time::Duration;

const CONSUMER: ConsumerId = 1;

struct Fixture {
    clock: Arc<ManualClock>,
    controller: Arc<RecordingController>,
    ctx: SurfaceContext,
    session_ctx: SessionContext,
    signals: Receiver<ShellEvent>,
}

impl Fixture {
    fn new() -> Self {
        let (events, signals) = EventSink::channel(256);
        let clock = Arc::new(ManualClock::new());
        let controller = Arc::new(RecordingController::new());
        let ctx = SurfaceContext {
            controller: controller.clone(),
            gpu: Arc::new(HeadlessGpu::new()),
            clock: clock.clone(),
            input: Arc::new(EventBuilder::new(DEFAULT_EVENT_INFO_CAPACITY)),
            events: events.clone(),
            config: SurfaceConfig::default(),
        };
        let session_ctx = SessionContext {
            prompts: Arc::new(HeadlessPromptSessions::new()),
            clock: clock.clone(),
            events,
            config: SessionConfig::default(),
        };
        Self {
            clock,
            controller,
            ctx,
            session_ctx,
            signals,
        }
    }

    fn surface(&self, id: u64) -> (Arc<Surface>, Arc<HeadlessSurface>) {
        self.surface_in(id, None)
    }

    fn surface_in(&self, id: u64, session: Option<&Arc<Session>>) -> (Arc<Surface>, Arc<HeadlessSurface>) {
        let mut info = WindowInfo::new(WindowId(id), 42);
        info.size = Size::new(100, 100);
        let compositor = Arc::new(HeadlessSurface::new(Size::new(100, 100)));
        let surface = Surface::new(&info, compositor.clone(), session, None, &self.ctx);
        (surface, compositor)
    }

    fn session(&self) -> Arc<Session> {
        Session::new(SessionId(1), Arc::new(HeadlessClient::new("app", 42)), &self.session_ctx)
    }

    fn surface_signals(&self, id: u64) -> Vec<SurfaceSignal> {
        self.signals
            .try_iter()
            .filter_map(|event| match event {
                ShellEvent::Surface(window, signal) if window == WindowId(id) => Some(signal),
                _ => None,
            })
            .collect()
    }

    fn expire_close_timer(&self, surface: &Surface) {
        self.clock.advance(Duration::from_millis(3000));
        surface.poll_timers(self.clock.now());
    }
}

fn key(kind: KeyInputKind, code: u32, timestamp: u64) -> KeyInput {
    KeyInput {
        kind,
        auto_repeat: false,
        native_virtual_key: code,
        native_scan_code: code + 8,
        native_modifiers: Modifiers::NONE,
        timestamp,
    }
}

fn keyboard_calls(controller: &RecordingController) -> Vec<(KeyboardAction, u32, u64)> {
    controller
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ControllerCall::Keyboard(_, event) => Some((event.action, event.key_code, event.timestamp)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_visible_only_once_ready() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);
    surface.update_visible();
    assert!(!surface.visible());

    surface.set_ready();
    assert!(surface.visible());
    assert_eq!(
        f.surface_signals(1),
        vec![SurfaceSignal::VisibleChanged(true), SurfaceSignal::Ready]
    );

    // A second ready is a no-op
    surface.set_ready();
    assert!(f.surface_signals(1).is_empty());

    compositor.set_visible(false);
    surface.on_hidden_changed();
    assert!(!surface.visible());
    compositor.set_visible(true);
    surface.on_hidden_changed();
    assert!(surface.visible());

    surface.update_state(WindowState::Minimized);
    assert!(!surface.visible());
}

#[test]
fn test_close_requested_once() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);

    surface.close();
    surface.close();

    assert_eq!(surface.closing_state(), ClosingState::Closing);
    assert!(surface.close_timer_running());
    assert_eq!(surface.close_timer_starts(), 1);
    assert_eq!(f.controller.count(|c| matches!(c, ControllerCall::RequestClose(_))), 1);
    let requested = f
        .surface_signals(1)
        .into_iter()
        .filter(|s| *s == SurfaceSignal::CloseRequested)
        .count();
    assert_eq!(requested, 1);
}

#[test]
fn test_close_timeout_terminates_application() {
    let f = Fixture::new();
    let session = f.session();
    let app = Arc::new(HeadlessApplication::new("org.example.editor"));
    session.set_application(Some(app.clone()));
    let (surface, _) = f.surface_in(1, Some(&session));

    surface.close();
    f.clock.advance(Duration::from_millis(2999));
    surface.poll_timers(f.clock.now());
    assert_eq!(surface.closing_state(), ClosingState::Closing);

    f.clock.advance(Duration::from_millis(1));
    surface.poll_timers(f.clock.now());
    assert_eq!(surface.closing_state(), ClosingState::CloseOverdue);
    assert_eq!(app.terminate_count(), 1);
    assert_eq!(surface.app_id(), "org.example.editor");
}

#[test]
fn test_close_timeout_spares_closing_application() {
    let f = Fixture::new();
    let session = f.session();
    let app = Arc::new(HeadlessApplication::new("org.example.editor"));
    app.set_closing(true);
    session.set_application(Some(app.clone()));
    let (surface, _) = f.surface_in(1, Some(&session));

    surface.close();
    f.expire_close_timer(&surface);
    assert_eq!(surface.closing_state(), ClosingState::CloseOverdue);
    assert_eq!(app.terminate_count(), 0);
    assert_eq!(f.controller.count(|c| matches!(c, ControllerCall::ForceClose(_))), 0);
}

#[test]
fn test_close_timeout_without_application_force_closes() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);

    surface.close();
    f.expire_close_timer(&surface);
    assert_eq!(f.controller.count(|c| *c == ControllerCall::ForceClose(WindowId(1))), 1);
    assert!(!surface.close_timer_running());
}

#[test]
fn test_close_timeout_ignored_after_death() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);

    surface.close();
    surface.set_live(false);
    f.expire_close_timer(&surface);
    assert_eq!(f.controller.count(|c| matches!(c, ControllerCall::ForceClose(_))), 0);
    assert!(surface.is_fully_closed());
}

#[test]
fn test_update_texture_is_idempotent_per_frame() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);
    let texture = surface.texture(CONSUMER);
    assert!(!surface.update_texture(2));

    compositor.post_frame();
    compositor.post_frame();
    surface.on_frames_posted();
    assert!(surface.frame_dropper_running());

    assert!(surface.update_texture(CONSUMER));
    assert!(texture.has_buffer());
    assert_eq!(surface.current_frame_number(CONSUMER), 1);
    assert_eq!(compositor.acquired(), 1);

    // Same frame again without a swap
    assert!(surface.update_texture(CONSUMER));
    assert_eq!(compositor.acquired(), 1);

    // A swap with nothing new keeps the held buffer
    surface.on_compositor_swapped_buffers();
    assert!(surface.update_texture(CONSUMER));
    assert_eq!(compositor.acquired(), 1);

    compositor.post_frame();
    surface.on_compositor_swapped_buffers();
    assert!(surface.update_texture(CONSUMER));
    assert_eq!(surface.current_frame_number(CONSUMER), 2);
    assert_eq!(compositor.acquired(), 2);
}

#[test]
fn test_new_buffer_size_updates_surface_size() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);
    let _texture = surface.texture(CONSUMER);

    compositor.set_buffer_size(Size::new(320, 240));
    compositor.post_frame();
    surface.update_texture(CONSUMER);

    assert_eq!(surface.size(), Size::new(320, 240));
    assert!(f
        .surface_signals(1)
        .contains(&SurfaceSignal::SizeChanged(Size::new(320, 240))));
}

#[test]
fn test_frame_dropper_drains_then_sleeps() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);
    let texture = surface.texture(CONSUMER);

    compositor.post_frame();
    compositor.post_frame();
    surface.on_frames_posted();
    f.signals.try_iter().count();

    f.clock.advance(Duration::from_millis(200));
    surface.poll_timers(f.clock.now());
    assert_eq!(compositor.acquired(), 1);
    assert!(texture.has_buffer());
    assert!(surface.frame_dropper_running());
    assert_eq!(f.surface_signals(1), vec![SurfaceSignal::FrameDropped]);

    // Nothing left to drop
    f.clock.advance(Duration::from_millis(200));
    surface.poll_timers(f.clock.now());
    assert_eq!(compositor.acquired(), 1);
    assert!(!surface.frame_dropper_running());
}

#[test]
fn test_dropped_texture_is_recreated() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);
    let first = surface.texture(CONSUMER);
    assert!(surface.weak_texture(CONSUMER).is_some());
    drop(first);
    assert!(surface.weak_texture(CONSUMER).is_none());

    let _second = surface.texture(CONSUMER);
    assert!(surface.weak_texture(CONSUMER).is_some());
}

#[test]
fn test_resize_deferred_while_suspended() {
    let f = Fixture::new();
    let session = f.session();
    let (surface, _) = f.surface_in(1, Some(&session));
    session.register_surface(surface.clone());
    surface.set_ready();
    session.suspend();
    session.do_suspend();
    assert_eq!(session.state(), SessionState::Suspended);

    surface.resize(200, 150);
    assert_eq!(surface.pending_resize(), Size::new(200, 150));
    assert_eq!(f.controller.count(|c| matches!(c, ControllerCall::Resize(..))), 0);

    session.resume();
    assert!(!surface.pending_resize().is_valid());
    assert_eq!(
        f.controller.count(|c| *c == ControllerCall::Resize(WindowId(1), Size::new(200, 150))),
        1
    );
}

#[test]
fn test_resize_to_current_size_is_skipped() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);

    surface.resize(100, 100);
    assert!(f.controller.calls().is_empty());

    surface.resize(300, 200);
    surface.resize(300, 200);
    assert_eq!(f.controller.count(|c| matches!(c, ControllerCall::Resize(..))), 2);
}

#[test]
fn test_release_only_forwarded_for_pressed_keys() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);

    surface.key_release(&key(KeyInputKind::Release, 30, 10));
    assert!(f.controller.calls().is_empty());

    surface.key_press(&key(KeyInputKind::Press, 30, 11));
    assert_eq!(surface.pressed_keys().len(), 1);
    surface.key_release(&key(KeyInputKind::Release, 30, 12));
    assert!(surface.pressed_keys().is_empty());

    assert_eq!(
        keyboard_calls(&f.controller),
        vec![(KeyboardAction::Down, 30, 11), (KeyboardAction::Up, 30, 12)]
    );
}

#[test]
fn test_auto_repeat_is_not_tracked() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);
    let mut repeat = key(KeyInputKind::Press, 30, 5);
    repeat.auto_repeat = true;

    surface.key_press(&repeat);
    assert!(surface.pressed_keys().is_empty());
    assert_eq!(keyboard_calls(&f.controller), vec![(KeyboardAction::Repeat, 30, 5)]);
}

#[test]
fn test_focus_gain_releases_held_keys() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);
    surface.key_press(&key(KeyInputKind::Press, 50, 1000));
    f.controller.clear();

    f.clock.advance(Duration::from_millis(40));
    surface.set_focused(true);

    assert!(surface.pressed_keys().is_empty());
    assert_eq!(keyboard_calls(&f.controller), vec![(KeyboardAction::Up, 50, 1040)]);
}

#[test]
fn test_exposure_waits_for_first_frame() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);

    surface.register_view(7);
    surface.set_view_exposure(7, true);
    assert!(surface.is_being_displayed());
    assert!(!compositor.exposed());

    surface.set_ready();
    assert!(compositor.exposed());

    surface.set_view_exposure(7, false);
    assert!(!compositor.exposed());
    surface.set_view_exposure(7, true);
    surface.unregister_view(7);
    assert!(!compositor.exposed());
    assert!(!surface.is_being_displayed());
}

#[test]
fn test_exposure_of_unknown_view_ignored() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);
    surface.set_ready();
    surface.set_view_exposure(3, true);
    assert!(!compositor.exposed());
}

#[test]
fn test_named_cursors() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);

    surface.on_named_cursor("text");
    assert_eq!(surface.cursor(), Some(CursorShape::IBeam));
    surface.on_named_cursor("not-a-cursor");
    assert_eq!(surface.cursor(), Some(CursorShape::Arrow));
    surface.on_cursor_removed();
    assert_eq!(surface.cursor(), None);
}

#[test]
fn test_requested_position_moves_in_display_coordinates() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);
    compositor.set_parent_top_left(Some(Point::new(100, 50)));

    surface.set_requested_position(Point::new(10, 10));
    surface.set_requested_position(Point::new(10, 10));
    assert_eq!(
        f.controller.calls(),
        vec![ControllerCall::MoveTo(WindowId(1), Point::new(110, 60))]
    );
    assert_eq!(surface.requested_position(), Point::new(10, 10));

    surface.set_live(false);
    surface.set_requested_position(Point::new(20, 20));
    assert_eq!(f.controller.calls().len(), 1);
}

#[test]
fn test_position_is_relative_to_parent() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);
    compositor.set_parent_top_left(Some(Point::new(100, 50)));
    compositor.set_top_left(Point::new(130, 90));

    surface.update_position();
    assert_eq!(surface.position(), Point::new(30, 40));
    assert_eq!(surface.convert_local_to_display(Point::new(0, 0)), Point::new(100, 50));
}

#[test]
fn test_keymap_failure_is_only_logged() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);

    surface.set_keymap("fr+bepo");
    assert_eq!(compositor.keymap(), Some(("fr".to_string(), "bepo".to_string())));

    compositor.fail_keymaps(true);
    surface.set_keymap("de");
    assert_eq!(surface.keymap(), "de");
    assert_eq!(compositor.keymap(), Some(("fr".to_string(), "bepo".to_string())));
    assert!(f
        .surface_signals(1)
        .contains(&SurfaceSignal::KeymapChanged("de".to_string())));
}

#[test]
fn test_unsupported_orientation_ignored() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);

    surface.set_orientation_angle(90);
    assert_eq!(surface.orientation_angle(), 90);
    assert_eq!(compositor.orientation(), Orientation::from_angle(90).unwrap());

    surface.set_orientation_angle(45);
    assert_eq!(surface.orientation_angle(), 90);
}

#[test]
fn test_concurrent_orientation_change_signals_once() {
    let f = Fixture::new();
    let (surface, compositor) = f.surface(1);
    f.surface_signals(1);

    let setters: Vec<_> = (0..8)
        .map(|_| {
            let surface = surface.clone();
            std::thread::spawn(move || surface.set_orientation_angle(180))
        })
        .collect();
    for setter in setters {
        setter.join().unwrap();
    }

    assert_eq!(surface.orientation_angle(), 180);
    assert_eq!(compositor.orientation(), Orientation::from_angle(180).unwrap());
    let changes = f
        .surface_signals(1)
        .into_iter()
        .filter(|s| *s == SurfaceSignal::OrientationAngleChanged(180))
        .count();
    assert_eq!(changes, 1);
}

#[test]
fn test_activate_requires_live_surface() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);

    surface.activate();
    surface.set_live(false);
    surface.activate();
    assert_eq!(f.controller.calls(), vec![ControllerCall::Activate(WindowId(1))]);
}

#[test]
fn test_input_bounds_unset_accepts_everything() {
    let f = Fixture::new();
    let (surface, _) = f.surface(1);
    assert!(surface.input_area_contains(Point::new(-5, 9000)));

    surface.set_input_bounds(Rect::new(0, 0, 50, 50));
    assert!(surface.input_area_contains(Point::new(10, 10)));
    assert!(!surface.input_area_contains(Point::new(60, 10)));
}
