//! In-memory compositor backend
//!
//! `headless` fakes the compositor's primitives (buffers, GPU, surfaces,
//! display, clients). `compositor` builds the window table and client
//! plumbing on top. [`HeadlessStack`] wires them to a shell the same way a
//! real compositor integration would.

pub mod compositor;
pub mod headless;

use crossbeam_channel::Receiver;
use std::sync::Arc;

use crate::clock::TimeSource;
use crate::config::ShellConfig;
use crate::input::{EventBuilder, InputDeviceObserver, DEFAULT_EVENT_INFO_CAPACITY};
use crate::policy::{BasePolicy, PolicyState, ShellPolicy};
use crate::screens::ScreensModel;
use crate::session::SessionContext;
use crate::shell::{Shell, ShellWindowModel, UiDispatcher, UiHandle, UiLoop};
use crate::signals::{EventSink, ShellEvent};
use crate::storage::open_storage;
use crate::surface::SurfaceContext;

pub use compositor::{HeadlessCompositor, HeadlessWindowManager};
pub use headless::{HeadlessDisplay, HeadlessGpu, HeadlessPromptSessions, RecordingDisplayListener};

/// A headless compositor wired to a shell
pub struct HeadlessStack {
    pub compositor: Arc<HeadlessCompositor>,
    pub windows: Arc<HeadlessWindowManager>,
    pub policy: Arc<ShellPolicy>,
    pub display: Arc<HeadlessDisplay>,
    pub listener: Arc<RecordingDisplayListener>,
    pub gpu: Arc<HeadlessGpu>,
    pub prompts: Arc<HeadlessPromptSessions>,
    pub keyboards: Arc<InputDeviceObserver>,
    pub dispatcher: UiDispatcher,
    pub ui: UiHandle,
    /// UI-facing signals of every state machine
    pub signals: Receiver<ShellEvent>,
}

impl HeadlessStack {
    /// Builds the compositor side plus the shell and UI loop that belong on
    /// the UI thread
    pub fn new(config: &ShellConfig, clock: Arc<dyn TimeSource>) -> (Self, Shell, UiLoop) {
        let (events, signals) = EventSink::channel(config.dispatch.queue_capacity);
        let (ui, ui_loop) = UiLoop::new(config.dispatch.queue_capacity);
        let dispatcher = UiDispatcher::new(ui.clone());
        let relay = Arc::new(dispatcher.clone());

        let state = PolicyState::new(events.clone(), relay.clone(), relay.clone(), &config.policy);
        let windows = Arc::new(HeadlessWindowManager::new());
        let model_ui = ui.clone();
        let policy = Arc::new(ShellPolicy::with_policy(windows.clone(), state, move |tools, state| {
            Box::new(ShellWindowModel::new(Box::new(BasePolicy::new(tools, state)), model_ui))
        }));
        let compositor = Arc::new(HeadlessCompositor::new(windows.clone(), policy.clone(), relay));

        let display = Arc::new(HeadlessDisplay::new(open_storage(
            config.screens.display_config_path.as_deref(),
        )));
        let listener = Arc::new(RecordingDisplayListener::new());
        let screens = Arc::new(ScreensModel::new(
            display.clone(),
            listener.clone(),
            events.clone(),
            &config.screens,
        ));

        let gpu = Arc::new(HeadlessGpu::new());
        let surface_ctx = SurfaceContext {
            controller: policy.clone(),
            gpu: gpu.clone(),
            clock: clock.clone(),
            input: Arc::new(EventBuilder::new(DEFAULT_EVENT_INFO_CAPACITY)),
            events: events.clone(),
            config: config.surface.clone(),
        };
        let prompts = Arc::new(HeadlessPromptSessions::new());
        let session_ctx = SessionContext {
            prompts: prompts.clone(),
            clock,
            events,
            config: config.session.clone(),
        };

        let keyboards = Arc::new(InputDeviceObserver::new());
        keyboards.set_keymap(&config.input.keymap);

        let shell = Shell::new(compositor.clone(), screens, surface_ctx, session_ctx, keyboards.clone());
        let stack = Self {
            compositor,
            windows,
            policy,
            display,
            listener,
            gpu,
            prompts,
            keyboards,
            dispatcher,
            ui,
            signals,
        };
        (stack, shell, ui_loop)
    }

    /// Signals queued so far
    pub fn drain_signals(&self) -> Vec<ShellEvent> {
        self.signals.try_iter().collect()
    }
}
