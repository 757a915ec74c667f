//! Input event model
//!
//! Two vocabularies meet here. Toolkit events ([`KeyInput`], [`MouseInput`],
//! [`HoverInput`], [`WheelInput`], [`TouchInput`]) are what the UI scene
//! delivers to a surface. Compositor events ([`KeyboardEvent`],
//! [`PointerEvent`], [`TouchEvent`]) are what the window controller
//! forwards to clients. [`EventBuilder`] translates between the two.

use std::ops::{BitOr, BitOrAssign};

use crate::geometry::Point;

mod event_builder;
mod keymap;

pub use event_builder::{EventBuilder, EventInfo, DEFAULT_EVENT_INFO_CAPACITY};
pub use keymap::{InputDevice, InputDeviceObserver, Keymap};

pub type DeviceId = u64;

/// Milliseconds, as carried by toolkit events. Zero marks a synthetic event.
pub type Timestamp = u64;

/// Keyboard modifier mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(u32);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const SHIFT: Modifiers = Modifiers(1 << 0);
    pub const CTRL: Modifiers = Modifiers(1 << 1);
    pub const ALT: Modifiers = Modifiers(1 << 2);
    pub const META: Modifiers = Modifiers(1 << 3);

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

/// Pointer button mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PointerButtons(u32);

impl PointerButtons {
    pub const NONE: PointerButtons = PointerButtons(0);
    pub const PRIMARY: PointerButtons = PointerButtons(1 << 0);
    pub const SECONDARY: PointerButtons = PointerButtons(1 << 1);
    pub const TERTIARY: PointerButtons = PointerButtons(1 << 2);
    pub const BACK: PointerButtons = PointerButtons(1 << 3);
    pub const FORWARD: PointerButtons = PointerButtons(1 << 4);

    pub fn contains(self, other: PointerButtons) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PointerButtons {
    type Output = PointerButtons;

    fn bitor(self, rhs: PointerButtons) -> PointerButtons {
        PointerButtons(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardAction {
    Down,
    Up,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    ButtonDown,
    ButtonUp,
    Enter,
    Leave,
    Motion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchAction {
    Down,
    Up,
    Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchTool {
    Finger,
    Stylus,
}

/// Keyboard event as forwarded to the client
#[derive(Debug, Clone, PartialEq)]
pub struct KeyboardEvent {
    pub device_id: DeviceId,
    pub timestamp: Timestamp,
    pub cookie: Vec<u8>,
    pub action: KeyboardAction,
    pub key_code: u32,
    pub scan_code: u32,
    pub modifiers: Modifiers,
}

/// Pointer event as forwarded to the client
#[derive(Debug, Clone, PartialEq)]
pub struct PointerEvent {
    pub device_id: DeviceId,
    pub timestamp: Timestamp,
    pub cookie: Vec<u8>,
    pub modifiers: Modifiers,
    pub action: PointerAction,
    pub buttons: PointerButtons,
    pub x: f32,
    pub y: f32,
    pub hscroll: f32,
    pub vscroll: f32,
    pub relative_x: f32,
    pub relative_y: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TouchContact {
    pub id: i32,
    pub action: TouchAction,
    pub tool: TouchTool,
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub touch_major: f32,
    pub touch_minor: f32,
}

/// Touch event as forwarded to the client
#[derive(Debug, Clone, PartialEq)]
pub struct TouchEvent {
    pub device_id: DeviceId,
    pub timestamp: Timestamp,
    pub cookie: Vec<u8>,
    pub modifiers: Modifiers,
    pub contacts: Vec<TouchContact>,
}

impl TouchEvent {
    pub fn has_action(&self, action: TouchAction) -> bool {
        self.contacts.iter().any(|c| c.action == action)
    }
}

/// Any event the policy may dispatch to a window
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Keyboard(KeyboardEvent),
    Pointer(PointerEvent),
    Touch(TouchEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInputKind {
    Press,
    Release,
}

/// Key event as delivered by the UI scene
#[derive(Debug, Clone, PartialEq)]
pub struct KeyInput {
    pub kind: KeyInputKind,
    pub auto_repeat: bool,
    pub native_virtual_key: u32,
    pub native_scan_code: u32,
    pub native_modifiers: Modifiers,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseInputKind {
    Press,
    Release,
    Move,
}

/// Mouse event as delivered by the UI scene
#[derive(Debug, Clone, PartialEq)]
pub struct MouseInput {
    pub kind: MouseInputKind,
    pub position: Point,
    pub buttons: PointerButtons,
    pub modifiers: Modifiers,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverInputKind {
    Enter,
    Leave,
    Move,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoverInput {
    pub kind: HoverInputKind,
    pub position: Point,
    pub modifiers: Modifiers,
    pub timestamp: Timestamp,
}

/// Wheel event; `angle_delta` is in eighths of a degree
#[derive(Debug, Clone, PartialEq)]
pub struct WheelInput {
    pub position: Point,
    pub angle_delta: Point,
    pub buttons: PointerButtons,
    pub modifiers: Modifiers,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPointState {
    Pressed,
    Moved,
    Stationary,
    Released,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TouchPointInput {
    pub id: i32,
    pub state: TouchPointState,
    pub is_pen: bool,
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TouchInput {
    pub modifiers: Modifiers,
    pub points: Vec<TouchPointInput>,
    pub timestamp: Timestamp,
}
