//! Headless demo session
//!
//! Plays the compositor's part on a worker thread: plugs an output, connects
//! simulated clients, has each open a window and post frames, types into the
//! focused window, then closes everything and stops the compositor. The shell
//! side runs unchanged on the UI thread.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tessera::backend::HeadlessStack;
use tessera::geometry::Size;
use tessera::input::{KeyboardAction, KeyboardEvent, Modifiers};
use tessera::screens::OutputConfiguration;
use tessera::shell::UiHandle;
use tessera::texture::ConsumerId;
use tessera::window::{WindowId, WindowSpecification, WindowType};

/// The demo's only renderer
const RENDER_CONSUMER: ConsumerId = 1;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const FIRST_PID: u32 = 1000;
const KEYBOARD_DEVICE: u64 = 1;

/// What the shell held at the end of the run
#[derive(Debug, Default)]
pub struct DemoSummary {
    pub windows_opened: usize,
    pub frames_posted: u64,
    pub keys_sent: u64,
    pub signals: usize,
    pub surfaces_left: usize,
    pub sessions_left: usize,
}

pub struct Demo {
    pub clients: u32,
    pub frames: u32,
    pub handoff_timeout: Duration,
    pub stop: Arc<AtomicBool>,
}

impl Demo {
    /// Runs the compositor side to completion. The UI loop is always told to
    /// quit, even when the run fails.
    pub fn run(self, stack: HeadlessStack, ui: UiHandle) -> Result<DemoSummary> {
        let result = self.drive(&stack, &ui);
        if ui.quit().is_err() {
            debug!("UI loop already gone");
        }
        result
    }

    fn drive(&self, stack: &HeadlessStack, ui: &UiHandle) -> Result<DemoSummary> {
        let mut summary = DemoSummary::default();

        let output = OutputConfiguration::new(1, "HEADLESS-1", Size::new(1920, 1080));
        stack.display.plug(output.clone());
        stack.compositor.output_created(&output);
        stack.dispatcher.compositor_starting();
        info!("🖥️ Output {} plugged ({}x{})", output.name, 1920, 1080);

        let windows = self.open_clients(stack);
        summary.windows_opened = windows.len();
        info!("🪟 {} client windows open", windows.len());

        if let Some(first) = windows.first() {
            stack.policy.activate(*first);
            stack.compositor.flush();
        }

        for frame in 0..self.frames {
            if self.stop.load(Ordering::SeqCst) {
                info!("🛑 Stopping after {} frames", frame);
                break;
            }
            for window in &windows {
                stack.compositor.post_frame(*window);
                summary.frames_posted += 1;
            }
            ui.post(|shell| {
                shell.render(RENDER_CONSUMER);
            })
            .context("UI thread gone while rendering")?;

            // Type one key every ten frames
            if frame % 10 == 0 {
                summary.keys_sent += self.type_key(stack, u64::from(frame) + 1);
            }
            summary.signals += stack.drain_signals().len();
            thread::sleep(FRAME_INTERVAL);
        }

        for pid in (0..self.clients).map(|i| FIRST_PID + i) {
            stack.compositor.disconnect(pid);
        }

        let (surfaces, sessions) = ui
            .blocking_handoff(|shell| (shell.surface_count(), shell.sessions().len()), self.handoff_timeout)
            .context("UI thread did not report its state")?;
        summary.surfaces_left = surfaces;
        summary.sessions_left = sessions;

        if let Err(e) = stack.dispatcher.compositor_stopping(self.handoff_timeout) {
            warn!("⚠️ Compositor stopped without the UI: {}", e);
        }
        summary.signals += stack.drain_signals().len();
        Ok(summary)
    }

    fn open_clients(&self, stack: &HeadlessStack) -> Vec<WindowId> {
        let request = WindowSpecification {
            window_type: Some(WindowType::Normal),
            ..Default::default()
        };

        let mut windows = Vec::new();
        for index in 0..self.clients {
            let pid = FIRST_PID + index;
            stack.compositor.connect(&format!("client-{}", index + 1), pid);
            let Some(window) = stack.compositor.open_window(pid, &request) else {
                warn!("⚠️ Client {} could not open a window", pid);
                continue;
            };
            stack.compositor.window_ready(window);
            windows.push(window);
        }
        windows
    }

    /// Presses and releases one key. Returns how many events were sent.
    fn type_key(&self, stack: &HeadlessStack, timestamp: u64) -> u64 {
        let key = |action, timestamp| KeyboardEvent {
            device_id: KEYBOARD_DEVICE,
            timestamp,
            cookie: Vec::new(),
            action,
            key_code: 30,
            scan_code: 38,
            modifiers: Modifiers::NONE,
        };
        stack.compositor.keyboard(&key(KeyboardAction::Down, timestamp));
        stack.compositor.keyboard(&key(KeyboardAction::Up, timestamp + 1));
        2
    }
}
