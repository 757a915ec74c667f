//! Keymaps and the keyboard device observer

use log::{debug, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, ShellError};
use crate::logging::KEYMAP;

use super::DeviceId;

/// A keymap given as `"layout+variant"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keymap {
    pub layout: String,
    pub variant: String,
}

impl Keymap {
    /// Splits `"layout+variant"`, skipping empty parts. The variant is optional.
    pub fn parse(layout_plus_variant: &str) -> Result<Self> {
        let mut parts = layout_plus_variant.split('+').filter(|p| !p.is_empty());
        let layout = parts
            .next()
            .ok_or_else(|| ShellError::InvalidKeymap(layout_plus_variant.to_string()))?;
        let variant = parts.next().unwrap_or_default();
        Ok(Self {
            layout: layout.to_string(),
            variant: variant.to_string(),
        })
    }
}

impl fmt::Display for Keymap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variant.is_empty() {
            write!(f, "{}", self.layout)
        } else {
            write!(f, "{}+{}", self.layout, self.variant)
        }
    }
}

/// An input device as seen by the compositor
pub trait InputDevice: Send + Sync {
    fn id(&self) -> DeviceId;
    fn name(&self) -> String;
    fn is_keyboard(&self) -> bool;
    fn is_alpha_numeric(&self) -> bool;
    fn apply_keymap(&self, layout: &str, variant: &str) -> Result<()>;
}

#[derive(Default)]
struct ObserverState {
    keymap: String,
    devices: Vec<Arc<dyn InputDevice>>,
}

/// Keeps every alphanumeric keyboard on the current keymap.
///
/// Called from the compositor thread for hotplug and from the UI thread for
/// keymap changes; one lock serialises both.
#[derive(Default)]
pub struct InputDeviceObserver {
    state: Mutex<ObserverState>,
}

impl InputDeviceObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keymap(&self) -> String {
        self.state.lock().keymap.clone()
    }

    pub fn set_keymap(&self, keymap: &str) {
        let mut state = self.state.lock();
        if state.keymap == keymap {
            return;
        }
        debug!(target: KEYMAP, "Set keymap {}", keymap);
        state.keymap = keymap.to_string();
        for device in &state.devices {
            apply_keymap(&state.keymap, device.as_ref());
        }
    }

    pub fn device_added(&self, device: Arc<dyn InputDevice>) {
        if !(device.is_keyboard() && device.is_alpha_numeric()) {
            return;
        }
        let mut state = self.state.lock();
        debug!(target: KEYMAP, "Device added {}", device.id());
        apply_keymap(&state.keymap, device.as_ref());
        state.devices.push(device);
    }

    pub fn device_removed(&self, id: DeviceId) {
        let mut state = self.state.lock();
        let before = state.devices.len();
        state.devices.retain(|device| device.id() != id);
        if state.devices.len() != before {
            debug!(target: KEYMAP, "Device removed {}", id);
        }
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }
}

fn apply_keymap(keymap: &str, device: &dyn InputDevice) {
    if keymap.is_empty() {
        return;
    }
    let keymap = match Keymap::parse(keymap) {
        Ok(keymap) => keymap,
        Err(e) => {
            warn!(target: KEYMAP, "{}", e);
            return;
        }
    };
    debug!(
        target: KEYMAP,
        "Applying keymap {} on {} {}",
        keymap,
        device.id(),
        device.name()
    );
    match device.apply_keymap(&keymap.layout, &keymap.variant) {
        Ok(()) => debug!(target: KEYMAP, "Keymap applied"),
        Err(e) => warn!(target: KEYMAP, "Keymap could not be applied: {}", e),
    }
}
