//! Screens and outputs
//!
//! The compositor only says that its display configuration changed.
//! [`ScreensModel::update`] works out what that means: which screens are
//! new, which can be updated in place, which must be recreated and which are
//! gone. Display buffers are matched to screens afterwards, so the UI only
//! ever hears about screens whose buffers are valid.

use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{ScaleChangePolicy, ScreensConfig};
use crate::error::Result;
use crate::geometry::{Point, Rect, Size};
use crate::logging::SCREENS;
use crate::signals::{EventSink, ScreenSignal};
use crate::storage::DisplayConfigurationOptions;


/// Identity of a screen object. A recreated screen gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScreenId(pub u64);

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "screen-{}", self.0)
    }
}

/// Identity of a physical output, stable across reconfigurations
pub type OutputId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputOrientation {
    #[default]
    Normal,
    Left,
    Inverted,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormFactor {
    #[default]
    Unknown,
    Phone,
    Tablet,
    Monitor,
    Tv,
    Projector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerMode {
    #[default]
    On,
    Standby,
    Suspend,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub size: Size,
    pub refresh_rate: f64,
}

/// One output as reported in the compositor's display configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfiguration {
    pub id: OutputId,
    pub name: String,
    pub connected: bool,
    pub used: bool,
    pub top_left: Point,
    pub mode: DisplayMode,
    pub orientation: OutputOrientation,
    pub form_factor: FormFactor,
    pub scale: f32,
    pub power_mode: PowerMode,
}

impl OutputConfiguration {
    pub fn new(id: OutputId, name: impl Into<String>, size: Size) -> Self {
        Self {
            id,
            name: name.into(),
            connected: true,
            used: true,
            top_left: Point::default(),
            mode: DisplayMode {
                size,
                refresh_rate: 60.0,
            },
            orientation: OutputOrientation::Normal,
            form_factor: FormFactor::Monitor,
            scale: 1.0,
            power_mode: PowerMode::On,
        }
    }

    /// Area covered in the shared display coordinate space
    pub fn geometry(&self) -> Rect {
        let size = match self.orientation {
            OutputOrientation::Left | OutputOrientation::Right => {
                Size::new(self.mode.size.height, self.mode.size.width)
            }
            OutputOrientation::Normal | OutputOrientation::Inverted => self.mode.size,
        };
        Rect::from_loc_and_size(self.top_left, size)
    }

    /// Overrides fields with whatever `options` sets
    pub fn apply(&mut self, options: &DisplayConfigurationOptions) {
        if let Some(used) = options.used {
            self.used = used;
        }
        if let Some(mode) = options.mode {
            self.mode = mode;
        }
        if let Some(orientation) = options.orientation {
            self.orientation = orientation;
        }
        if let Some(form_factor) = options.form_factor {
            self.form_factor = form_factor;
        }
        if let Some(scale) = options.scale {
            self.scale = scale;
        }
    }
}

/// A render target of the compositor, covering one output's view area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayBuffer {
    pub id: u64,
    pub view_area: Rect,
}

/// The compositor's display
pub trait Display: Send + Sync {
    fn configuration(&self) -> Vec<OutputConfiguration>;
    fn display_buffers(&self) -> Vec<DisplayBuffer>;
    fn configure_output(&self, id: OutputId, options: &DisplayConfigurationOptions) -> Result<()>;
}

/// Told about display areas the shell renders to
pub trait DisplayListener: Send + Sync {
    fn add_display(&self, area: Rect);
    fn remove_display(&self, area: Rect);
}

/// A toplevel UI window shown on a screen
pub trait ScreenWindow: Send + Sync {
    fn id(&self) -> u64;
    fn is_exposed(&self) -> bool;
    fn set_exposed(&self, exposed: bool);
    fn hide(&self);
}

/// Wants to hear about output hotplug and reconfiguration
pub trait OutputObserver: Send + Sync {
    fn outputs_changed(&self);
}

struct ScreenState {
    config: OutputConfiguration,
    display_buffer: Option<DisplayBuffer>,
    windows: Vec<Arc<dyn ScreenWindow>>,
}

pub struct Screen {
    id: ScreenId,
    state: Mutex<ScreenState>,
}

impl Screen {
    fn new(id: ScreenId, config: OutputConfiguration) -> Self {
        Self {
            id,
            state: Mutex::new(ScreenState {
                config,
                display_buffer: None,
                windows: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> ScreenId {
        self.id
    }

    pub fn output_id(&self) -> OutputId {
        self.state.lock().config.id
    }

    pub fn configuration(&self) -> OutputConfiguration {
        self.state.lock().config.clone()
    }

    pub fn geometry(&self) -> Rect {
        self.state.lock().config.geometry()
    }

    pub fn scale(&self) -> f32 {
        self.state.lock().config.scale
    }

    pub fn used(&self) -> bool {
        self.state.lock().config.used
    }

    pub fn power_mode(&self) -> PowerMode {
        self.state.lock().config.power_mode
    }

    pub fn display_buffer(&self) -> Option<DisplayBuffer> {
        self.state.lock().display_buffer
    }

    pub fn windows(&self) -> Vec<Arc<dyn ScreenWindow>> {
        self.state.lock().windows.clone()
    }

    pub fn add_window(&self, window: Arc<dyn ScreenWindow>) {
        let mut state = self.state.lock();
        if !state.windows.iter().any(|w| w.id() == window.id()) {
            state.windows.push(window);
        }
    }

    pub fn remove_window(&self, id: u64) {
        self.state.lock().windows.retain(|w| w.id() != id);
    }

    fn set_configuration(&self, config: OutputConfiguration) {
        self.state.lock().config = config;
    }

    fn set_display_buffer(&self, buffer: DisplayBuffer) {
        self.state.lock().display_buffer = Some(buffer);
    }

    fn take_windows(&self) -> Vec<Arc<dyn ScreenWindow>> {
        std::mem::take(&mut self.state.lock().windows)
    }

    fn hide_exposed_windows(&self) {
        for window in self.windows() {
            if window.is_exposed() {
                window.hide();
            }
        }
    }
}

impl fmt::Debug for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Screen")
            .field("id", &self.id)
            .field("output", &state.config.id)
            .field("geometry", &state.config.geometry())
            .field("scale", &state.config.scale)
            .field("windows", &state.windows.len())
            .finish()
    }
}

/// The set of screens the UI renders to
pub struct ScreensModel {
    display: Arc<dyn Display>,
    listener: Arc<dyn DisplayListener>,
    events: EventSink,
    scale_change: ScaleChangePolicy,
    next_id: AtomicU64,
    compositing: AtomicBool,
    screens: Mutex<Vec<Arc<Screen>>>,
}

impl ScreensModel {
    pub fn new(
        display: Arc<dyn Display>,
        listener: Arc<dyn DisplayListener>,
        events: EventSink,
        config: &ScreensConfig,
    ) -> Self {
        Self {
            display,
            listener,
            events,
            scale_change: config.scale_change,
            next_id: AtomicU64::new(1),
            compositing: AtomicBool::new(false),
            screens: Mutex::new(Vec::new()),
        }
    }

    pub fn screens(&self) -> Vec<Arc<Screen>> {
        self.screens.lock().clone()
    }

    pub fn screen_for_output(&self, output: OutputId) -> Option<Arc<Screen>> {
        self.screens.lock().iter().find(|s| s.output_id() == output).cloned()
    }

    pub fn is_compositing(&self) -> bool {
        self.compositing.load(Ordering::SeqCst)
    }

    fn create_screen(&self, config: OutputConfiguration) -> Arc<Screen> {
        let id = ScreenId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(Screen::new(id, config))
    }

    /// Whether a changed output can keep its screen object
    fn can_update_existing_screen(&self, screen: &Screen, output: &OutputConfiguration) -> bool {
        let scale_changed = (screen.scale() - output.scale).abs() > f32::EPSILON;
        !scale_changed || self.scale_change == ScaleChangePolicy::Reuse
    }

    /// Reconciles the screens with the compositor's current configuration
    pub fn update(&self) {
        debug!(target: SCREENS, "update()");
        let configuration = self.display.configuration();

        let mut old_screens = std::mem::take(&mut *self.screens.lock());
        let mut current = Vec::new();
        let mut added = Vec::new();
        let mut moves: Vec<(Arc<dyn ScreenWindow>, Arc<Screen>)> = Vec::new();

        for output in configuration {
            if !output.connected {
                debug!(target: SCREENS, "Output {} is not connected", output.id);
                continue;
            }

            let existing = old_screens.iter().position(|s| s.output_id() == output.id);
            let screen = match existing {
                Some(index) if self.can_update_existing_screen(&old_screens[index], &output) => {
                    debug!(target: SCREENS, "Can reuse screen for output {}", output.id);
                    let screen = old_screens.remove(index);
                    screen.set_configuration(output.clone());
                    screen
                }
                Some(index) => {
                    debug!(target: SCREENS, "Recreating screen for output {}", output.id);
                    let new_screen = self.create_screen(output.clone());
                    for window in old_screens[index].take_windows() {
                        moves.push((window, new_screen.clone()));
                    }
                    self.listener.add_display(new_screen.geometry());
                    added.push(new_screen.clone());
                    new_screen
                }
                None => {
                    debug!(target: SCREENS, "New screen for output {}", output.id);
                    let screen = self.create_screen(output.clone());
                    added.push(screen.clone());
                    screen
                }
            };

            if !output.used {
                screen.hide_exposed_windows();
            }
            current.push(screen);
        }

        // Buffers must be valid before the UI hears about the screens
        for buffer in self.display.display_buffers() {
            if let Some(screen) = current.iter().find(|s| s.geometry() == buffer.view_area) {
                screen.set_display_buffer(buffer);
            }
        }

        *self.screens.lock() = current.clone();

        for screen in &added {
            info!(target: SCREENS, "Screen {} added for output {}", screen.id(), screen.output_id());
            self.events.screen(ScreenSignal::Added(screen.id()));
        }

        for (window, screen) in moves {
            debug!(target: SCREENS, "Moving window {} to {}", window.id(), screen.id());
            screen.add_window(window);
        }

        for screen in old_screens {
            info!(
                target: SCREENS,
                "Screen {} removed (output {}, geometry {:?})",
                screen.id(),
                screen.output_id(),
                screen.geometry()
            );
            screen.hide_exposed_windows();
            self.events.screen(ScreenSignal::AboutToBeRemoved(screen.id()));
            self.listener.remove_display(screen.geometry());
            self.events.screen(ScreenSignal::Removed(screen.id()));
        }

        for screen in &current {
            debug!(target: SCREENS, "{:?}", screen);
        }
    }

    /// Exposes windows on every used, powered screen. Does not wait for
    /// rendering to begin.
    pub fn start_renderer(&self) {
        for screen in self.screens() {
            if screen.used() && screen.power_mode() == PowerMode::On {
                for window in screen.windows() {
                    window.set_exposed(true);
                }
            }
        }
    }

    /// Unexposes every window so rendering stops
    pub fn halt_renderer(&self) {
        for screen in self.screens() {
            for window in screen.windows() {
                window.set_exposed(false);
            }
        }
    }

    pub fn on_compositor_starting(&self) {
        debug!(target: SCREENS, "compositor starting");
        self.compositing.store(true, Ordering::SeqCst);
        // Hardware changes first, then rendering
        self.update();
        self.start_renderer();
    }

    pub fn on_compositor_stopping(&self) {
        debug!(target: SCREENS, "compositor stopping");
        self.compositing.store(false, Ordering::SeqCst);
        // Rendering must stop before hardware changes are handled
        self.halt_renderer();
        self.update();
    }

    /// Applies new options to an output and reconciles
    pub fn configure_output(&self, output: OutputId, options: &DisplayConfigurationOptions) -> Result<()> {
        info!(target: SCREENS, "Configuring output {}: {:?}", output, options);
        self.display.configure_output(output, options)?;
        self.update();
        Ok(())
    }
}

impl OutputObserver for ScreensModel {
    fn outputs_changed(&self) {
        self.update();
    }
}
