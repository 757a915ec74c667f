use super::*;
use crate::backend::compositor::HeadlessWindowManager;
use crate::input::{
    KeyboardAction, Modifiers, PointerAction, PointerButtons, TouchAction, TouchContact, TouchTool,
};
use crate::signals::ShellEvent;
use crate::surface::WindowController;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Weak;

#[derive(Default)]
struct RecordingFeeder {
    keys: AtomicUsize,
    pointers: AtomicUsize,
    touches: AtomicUsize,
}

impl InputFeeder for RecordingFeeder {
    fn dispatch_key(&self, _event: &KeyboardEvent) {
        self.keys.fetch_add(1, Ordering::SeqCst);
    }

    fn dispatch_pointer(&self, _event: &PointerEvent) {
        self.pointers.fetch_add(1, Ordering::SeqCst);
    }

    fn dispatch_touch(&self, _event: &TouchEvent) {
        self.touches.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingOutputs {
    changes: AtomicUsize,
}

impl OutputObserver for CountingOutputs {
    fn outputs_changed(&self) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    tools: Arc<HeadlessWindowManager>,
    policy: ShellPolicy,
    feeder: Arc<RecordingFeeder>,
    outputs: Arc<CountingOutputs>,
    signals: Receiver<ShellEvent>,
}

fn fixture() -> Fixture {
    let (events, signals) = EventSink::channel(256);
    let feeder = Arc::new(RecordingFeeder::default());
    let outputs = Arc::new(CountingOutputs::default());
    let state = PolicyState::new(events, feeder.clone(), outputs.clone(), &PolicyConfig::default());
    let tools = Arc::new(HeadlessWindowManager::new());
    let policy = ShellPolicy::new(tools.clone(), state);
    Fixture {
        tools,
        policy,
        feeder,
        outputs,
        signals,
    }
}

impl Fixture {
    /// Places and inserts a window the way the compositor does
    fn add_window(&self, id: u64, state: CompositorWindowState, parent: Option<WindowId>) -> WindowId {
        let app = ApplicationInfo {
            pid: 100,
            name: "app".to_string(),
        };
        let request = WindowSpecification {
            window_type: Some(WindowType::Normal),
            parent,
            ..Default::default()
        };
        let placement = self.policy.place_new_window(&app, &request);

        let mut info = WindowInfo::new(WindowId(id), app.pid);
        info.state = state;
        info.parent = parent;
        info.size = Size::new(100, 100);
        info.extra = Some(placement.extra);
        self.tools.insert_window(info.clone());
        self.policy.advise_new_window(&info);
        info.id
    }

    fn info(&self, window: WindowId) -> WindowInfo {
        self.tools.window(window).unwrap()
    }

    fn extra(&self, window: WindowId) -> Arc<ExtraWindowInfo> {
        self.info(window).extra.unwrap()
    }

    fn window_model_signals(&self) -> Vec<WindowModelSignal> {
        self.signals
            .try_iter()
            .filter_map(|event| match event {
                ShellEvent::WindowModel(signal) => Some(signal),
                _ => None,
            })
            .collect()
    }
}

fn key(action: KeyboardAction) -> KeyboardEvent {
    KeyboardEvent {
        device_id: 1,
        timestamp: 10,
        cookie: Vec::new(),
        action,
        key_code: 30,
        scan_code: 38,
        modifiers: Modifiers::NONE,
    }
}

fn pointer(action: PointerAction) -> PointerEvent {
    PointerEvent {
        device_id: 2,
        timestamp: 20,
        cookie: Vec::new(),
        modifiers: Modifiers::NONE,
        action,
        buttons: PointerButtons::PRIMARY,
        x: 5.0,
        y: 5.0,
        hscroll: 0.0,
        vscroll: 0.0,
        relative_x: 0.0,
        relative_y: 0.0,
    }
}

fn touch() -> TouchEvent {
    TouchEvent {
        device_id: 3,
        timestamp: 30,
        cookie: Vec::new(),
        modifiers: Modifiers::NONE,
        contacts: vec![TouchContact {
            id: 0,
            action: TouchAction::Down,
            tool: TouchTool::Finger,
            x: 5.0,
            y: 5.0,
            pressure: 1.0,
            touch_major: 4.0,
            touch_minor: 4.0,
        }],
    }
}

#[test]
fn test_new_window_gets_persistent_id_and_state() {
    let f = fixture();
    let window = f.add_window(5, CompositorWindowState::Maximized, None);

    let extra = f.extra(window);
    assert_eq!(extra.persistent_id(), "headless-5");
    assert_eq!(extra.state(), WindowState::Maximized);
    assert!(f
        .window_model_signals()
        .contains(&WindowModelSignal::WindowAdded(window)));
}

#[test]
fn test_activate_restores_previous_state() {
    let f = fixture();
    let window = f.add_window(1, CompositorWindowState::Maximized, None);

    f.policy.request_state(window, WindowState::Minimized);
    assert_eq!(f.info(window).state, CompositorWindowState::Minimized);

    f.policy.activate(window);
    assert_eq!(f.info(window).state, CompositorWindowState::Maximized);
    assert_eq!(f.extra(window).state(), WindowState::Maximized);
    assert_eq!(f.tools.active_window(), Some(window));
}

#[test]
fn test_activate_after_double_minimize_keeps_original_state() {
    let f = fixture();
    let window = f.add_window(1, CompositorWindowState::Fullscreen, None);

    f.policy.request_state(window, WindowState::Minimized);
    f.policy.request_state(window, WindowState::Minimized);
    f.policy.activate(window);

    assert_eq!(f.info(window).state, CompositorWindowState::Fullscreen);
}

#[test]
fn test_placeholder_state_survives_restored_advice() {
    let f = fixture();
    let window = f.add_window(1, CompositorWindowState::Restored, None);
    f.window_model_signals();

    // The compositor already shows it as restored, so nothing is modified
    f.policy.request_state(window, WindowState::MaximizedLeft);
    assert_eq!(f.info(window).state, CompositorWindowState::Restored);
    assert_eq!(f.tools.lock_count(), 0);

    let info = f.info(window);
    f.policy.advise_state_change(&info, CompositorWindowState::Restored);
    assert_eq!(f.extra(window).state(), WindowState::MaximizedLeft);

    f.policy.advise_state_change(&info, CompositorWindowState::Maximized);
    assert_eq!(f.extra(window).state(), WindowState::Maximized);

    let signals = f.window_model_signals();
    assert_eq!(
        signals,
        vec![
            WindowModelSignal::WindowStateChanged(window, WindowState::MaximizedLeft),
            WindowModelSignal::WindowStateChanged(window, WindowState::MaximizedLeft),
            WindowModelSignal::WindowStateChanged(window, WindowState::Maximized),
        ]
    );
}

#[test]
fn test_key_down_focuses_before_dispatch() {
    let f = fixture();
    let a = f.add_window(1, CompositorWindowState::Restored, None);
    let b = f.add_window(2, CompositorWindowState::Restored, None);
    f.policy.activate(a);

    f.policy.deliver_keyboard_event(b, key(KeyboardAction::Down));
    assert_eq!(f.tools.active_window(), Some(b));

    // Releases and repeats never move focus
    f.policy.deliver_keyboard_event(a, key(KeyboardAction::Up));
    f.policy.deliver_keyboard_event(a, key(KeyboardAction::Repeat));
    assert_eq!(f.tools.active_window(), Some(b));

    let dispatched = f.tools.dispatched();
    assert_eq!(dispatched.len(), 3);
    assert_eq!(dispatched[0].0, b);
    assert!(matches!(dispatched[0].1, InputEvent::Keyboard(_)));
}

#[test]
fn test_pointer_motion_never_moves_focus() {
    let f = fixture();
    let a = f.add_window(1, CompositorWindowState::Restored, None);
    let b = f.add_window(2, CompositorWindowState::Restored, None);
    f.policy.activate(b);

    f.policy.deliver_pointer_event(a, pointer(PointerAction::Motion));
    f.policy.deliver_pointer_event(a, pointer(PointerAction::Enter));
    assert_eq!(f.tools.active_window(), Some(b));

    f.policy.deliver_pointer_event(a, pointer(PointerAction::ButtonDown));
    assert_eq!(f.tools.active_window(), Some(a));
    assert_eq!(f.tools.dispatched().len(), 3);
}

#[test]
fn test_touch_focuses_target() {
    let f = fixture();
    let a = f.add_window(1, CompositorWindowState::Restored, None);
    let b = f.add_window(2, CompositorWindowState::Restored, None);
    f.policy.activate(a);

    f.policy.deliver_touch_event(b, touch());
    assert_eq!(f.tools.active_window(), Some(b));
    assert!(matches!(f.tools.dispatched()[0].1, InputEvent::Touch(_)));
}

#[test]
fn test_input_to_active_window_takes_no_focus_change() {
    let f = fixture();
    let a = f.add_window(1, CompositorWindowState::Restored, None);
    f.policy.activate(a);
    let advice_before = f.tools.take_advice().len();
    assert!(advice_before > 0);

    f.policy.deliver_keyboard_event(a, key(KeyboardAction::Down));
    assert!(f.tools.take_advice().is_empty());
}

#[test]
fn test_move_to_workspace_moves_the_root_tree() {
    let f = fixture();
    let root = f.add_window(1, CompositorWindowState::Restored, None);
    let child = f.add_window(2, CompositorWindowState::Restored, Some(root));
    let grandchild = f.add_window(3, CompositorWindowState::Restored, Some(child));

    f.policy.move_window_to_workspace(root, 1);
    assert_eq!(f.policy.windows_in_workspace(1), vec![root, child, grandchild]);

    f.policy.move_window_to_workspace(grandchild, 2);
    assert!(f.policy.windows_in_workspace(1).is_empty());
    assert_eq!(f.policy.windows_in_workspace(2), vec![root, child, grandchild]);
}

#[test]
fn test_move_workspace_content() {
    let f = fixture();
    let a = f.add_window(1, CompositorWindowState::Restored, None);
    let b = f.add_window(2, CompositorWindowState::Restored, None);
    f.policy.move_window_to_workspace(a, 1);
    f.policy.move_window_to_workspace(b, 1);

    f.policy.move_workspace_content_to_workspace(3, 1);
    assert!(f.policy.windows_in_workspace(1).is_empty());
    assert_eq!(f.policy.windows_in_workspace(3), vec![a, b]);
}

#[test]
fn test_client_resize_dropped_when_not_allowed() {
    let f = fixture();
    let window = f.add_window(1, CompositorWindowState::Restored, None);
    let request = WindowSpecification {
        size: Some(Size::new(300, 300)),
        top_left: Some(Point::new(10, 10)),
        ..Default::default()
    };

    let allowed = f.policy.handle_modify_window(&f.info(window), &request);
    assert_eq!(allowed, request);

    f.extra(window).set_allow_client_resize(false);
    let allowed = f.policy.handle_modify_window(&f.info(window), &request);
    assert_eq!(allowed.size, None);
    assert_eq!(allowed.top_left, Some(Point::new(10, 10)));
}

#[test]
fn test_operations_on_missing_window_are_swallowed() {
    let f = fixture();
    let gone = WindowId(99);

    f.policy.resize(gone, Size::new(10, 10));
    f.policy.move_to(gone, Point::new(1, 1));
    f.policy.raise(gone);
    f.policy.force_close(gone);
    f.policy.move_window_to_workspace(gone, 1);
    assert_eq!(f.tools.lock_count(), 5);

    // No record to read, so no lock is taken
    f.policy.activate(gone);
    f.policy.request_state(gone, WindowState::Maximized);
    assert_eq!(f.tools.lock_count(), 5);
}

#[test]
fn test_close_requests_and_force_close() {
    let f = fixture();
    let parent = f.add_window(1, CompositorWindowState::Restored, None);
    let child = f.add_window(2, CompositorWindowState::Restored, Some(parent));

    f.policy.ask_client_to_close(child);
    assert_eq!(f.tools.close_requests(), vec![child]);
    assert!(f.tools.window(child).is_some());

    f.policy.force_close(parent);
    assert!(f.tools.window(parent).is_none());
    assert!(f.tools.window(child).is_none());
}

#[test]
fn test_initial_size_only_for_main_windows() {
    let f = fixture();
    let app = ApplicationInfo {
        pid: 7,
        name: "gallery".to_string(),
    };
    f.policy.state().initial_sizes().set(7, Size::new(300, 200));

    let normal = WindowSpecification {
        window_type: Some(WindowType::Normal),
        ..Default::default()
    };
    assert_eq!(f.policy.place_new_window(&app, &normal).spec.size, Some(Size::new(300, 200)));

    let dialog = WindowSpecification {
        window_type: Some(WindowType::Dialog),
        ..Default::default()
    };
    assert_eq!(f.policy.place_new_window(&app, &dialog).spec.size, None);

    let child = WindowSpecification {
        parent: Some(WindowId(1)),
        ..normal.clone()
    };
    assert_eq!(f.policy.place_new_window(&app, &child).spec.size, None);

    f.policy.advise_delete_app(&app);
    assert!(!f.policy.state().initial_sizes().get(7).is_valid());
}

#[test]
fn test_inherited_move_confined() {
    let f = fixture();
    f.policy
        .set_window_confinement_regions(vec![Rect::new(0, 0, 1000, 1000)]);
    let mut info = WindowInfo::new(WindowId(1), 1);
    info.top_left = Point::new(950, 100);
    info.size = Size::new(100, 100);

    let right = f.policy.confirm_inherited_move(&info, Displacement::new(20, 0));
    assert_eq!(right.top_left(), Point::new(950, 100));

    let left = f.policy.confirm_inherited_move(&info, Displacement::new(-20, 0));
    assert_eq!(left.top_left(), Point::new(930, 100));
}

#[test]
fn test_input_hooks_feed_the_ui() {
    let f = fixture();
    assert!(f.policy.handle_keyboard_event(&key(KeyboardAction::Down)));
    assert!(f.policy.handle_pointer_event(&pointer(PointerAction::Motion)));
    assert!(f.policy.handle_touch_event(&touch()));

    assert_eq!(f.feeder.keys.load(Ordering::SeqCst), 1);
    assert_eq!(f.feeder.pointers.load(Ordering::SeqCst), 1);
    assert_eq!(f.feeder.touches.load(Ordering::SeqCst), 1);
}

#[test]
fn test_output_advice_updates_screens() {
    let f = fixture();
    let output = OutputConfiguration::new(1, "DP-1", Size::new(1920, 1080));
    f.policy.advise_output_create(&output);
    f.policy.advise_output_update(&output, &output);
    f.policy.advise_output_delete(&output);
    assert_eq!(f.outputs.changes.load(Ordering::SeqCst), 3);
}

/// Window manager that calls back into the policy while locked
struct ReentrantTools {
    inner: HeadlessWindowManager,
    policy: Mutex<Option<Weak<ShellPolicy>>>,
}

impl WindowManagerTools for ReentrantTools {
    fn invoke_under_lock(&self, f: &mut dyn FnMut(&mut dyn WindowTable)) {
        let policy = self.policy.lock().take().and_then(|p| p.upgrade());
        if let Some(policy) = policy {
            policy.force_close(WindowId(1));
        }
        self.inner.invoke_under_lock(f);
    }

    fn info_for(&self, window: WindowId) -> Result<WindowInfo> {
        self.inner.info_for(window)
    }

    fn id_for_window(&self, window: WindowId) -> String {
        self.inner.id_for_window(window)
    }

    fn dispatch_input_event(&self, window: WindowId, event: InputEvent) {
        self.inner.dispatch_input_event(window, event);
    }
}

#[test]
fn test_nested_lock_is_refused() {
    let (events, _signals) = EventSink::channel(16);
    let state = PolicyState::new(
        events,
        Arc::new(RecordingFeeder::default()),
        Arc::new(CountingOutputs::default()),
        &PolicyConfig::default(),
    );
    let tools = Arc::new(ReentrantTools {
        inner: HeadlessWindowManager::new(),
        policy: Mutex::new(None),
    });
    tools.inner.insert_window(WindowInfo::new(WindowId(1), 1));
    let policy = Arc::new(ShellPolicy::new(tools.clone(), state));
    *tools.policy.lock() = Some(Arc::downgrade(&policy));

    policy.raise(WindowId(1));

    assert!(tools.inner.window(WindowId(1)).is_some());
    assert_eq!(tools.inner.lock_count(), 1);
    assert_eq!(tools.inner.stacking(), vec![WindowId(1)]);
}
