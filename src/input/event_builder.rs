//! Toolkit to compositor event translation
//!
//! Toolkit events lose information the client needs (device id, relative
//! pointer motion, the event cookie). The compositor side records that
//! information with [`EventBuilder::store`] as events go by, and the
//! builder looks it up again by timestamp when the UI hands an event back.

use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{
    DeviceId, HoverInput, HoverInputKind, KeyInput, KeyInputKind, KeyboardAction, KeyboardEvent, Modifiers,
    MouseInput, MouseInputKind, PointerAction, PointerButtons, PointerEvent, Timestamp, TouchAction, TouchContact,
    TouchEvent, TouchInput, TouchPointState, TouchTool, WheelInput,
};
use crate::logging::INPUT;

/// How many recent events are remembered
pub const DEFAULT_EVENT_INFO_CAPACITY: usize = 32;

/// Angle delta of one wheel step
const DELTAS_PER_STEP: f32 = 120.0;

/// Metadata of a compositor event that the toolkit does not carry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventInfo {
    pub timestamp: Timestamp,
    pub device_id: DeviceId,
    pub relative_x: f32,
    pub relative_y: f32,
    pub cookie: Vec<u8>,
}

#[derive(Debug)]
pub struct EventBuilder {
    capacity: usize,
    infos: Mutex<VecDeque<EventInfo>>,
}

impl EventBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            infos: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Remembers metadata of an event on its way to the UI
    pub fn store(&self, info: EventInfo) {
        let mut infos = self.infos.lock();
        if infos.len() == self.capacity {
            infos.pop_front();
        }
        infos.push_back(info);
    }

    pub fn find_info(&self, timestamp: Timestamp) -> Option<EventInfo> {
        self.infos
            .lock()
            .iter()
            .rev()
            .find(|info| info.timestamp == timestamp)
            .cloned()
    }

    /// Looks up metadata unless the event is synthetic
    fn lookup(&self, timestamp: Timestamp) -> Option<EventInfo> {
        if timestamp == 0 {
            return None;
        }
        let info = self.find_info(timestamp);
        if info.is_none() {
            warn!(target: INPUT, "No event info stored for timestamp {}", timestamp);
        }
        info
    }

    pub fn pointer_from_mouse(&self, event: &MouseInput) -> PointerEvent {
        let action = match event.kind {
            MouseInputKind::Press => PointerAction::ButtonDown,
            MouseInputKind::Release => PointerAction::ButtonUp,
            MouseInputKind::Move => PointerAction::Motion,
        };
        self.make_pointer(event.timestamp, event.modifiers, action, event.buttons, event.position.x, event.position.y)
    }

    pub fn pointer_from_hover(&self, event: &HoverInput) -> PointerEvent {
        let action = match event.kind {
            HoverInputKind::Enter => PointerAction::Enter,
            HoverInputKind::Leave => PointerAction::Leave,
            HoverInputKind::Move => PointerAction::Motion,
        };
        self.make_pointer(
            event.timestamp,
            event.modifiers,
            action,
            PointerButtons::NONE,
            event.position.x,
            event.position.y,
        )
    }

    fn make_pointer(
        &self,
        timestamp: Timestamp,
        modifiers: Modifiers,
        action: PointerAction,
        buttons: PointerButtons,
        x: i32,
        y: i32,
    ) -> PointerEvent {
        let info = self.lookup(timestamp).unwrap_or_default();
        PointerEvent {
            device_id: info.device_id,
            timestamp,
            cookie: info.cookie,
            modifiers,
            action,
            buttons,
            x: x as f32,
            y: y as f32,
            hscroll: 0.0,
            vscroll: 0.0,
            relative_x: info.relative_x,
            relative_y: info.relative_y,
        }
    }

    pub fn pointer_from_wheel(&self, event: &WheelInput) -> PointerEvent {
        let info = self.lookup(event.timestamp).unwrap_or_default();
        PointerEvent {
            device_id: info.device_id,
            timestamp: event.timestamp,
            cookie: info.cookie,
            modifiers: event.modifiers,
            action: PointerAction::Motion,
            buttons: event.buttons,
            x: event.position.x as f32,
            y: event.position.y as f32,
            hscroll: event.angle_delta.x as f32 / DELTAS_PER_STEP,
            vscroll: event.angle_delta.y as f32 / DELTAS_PER_STEP,
            relative_x: 0.0,
            relative_y: 0.0,
        }
    }

    pub fn keyboard_from_key(&self, event: &KeyInput) -> KeyboardEvent {
        let action = if event.auto_repeat {
            KeyboardAction::Repeat
        } else {
            match event.kind {
                KeyInputKind::Press => KeyboardAction::Down,
                KeyInputKind::Release => KeyboardAction::Up,
            }
        };
        let info = self.lookup(event.timestamp).unwrap_or_default();
        self.make_key_event(
            info.device_id,
            event.timestamp,
            info.cookie,
            action,
            event.native_virtual_key,
            event.native_scan_code,
            event.native_modifiers,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn make_key_event(
        &self,
        device_id: DeviceId,
        timestamp: Timestamp,
        cookie: Vec<u8>,
        action: KeyboardAction,
        key_code: u32,
        scan_code: u32,
        modifiers: Modifiers,
    ) -> KeyboardEvent {
        KeyboardEvent {
            device_id,
            timestamp,
            cookie,
            action,
            key_code,
            scan_code,
            modifiers,
        }
    }

    pub fn touch_from(&self, event: &TouchInput) -> TouchEvent {
        let info = self.lookup(event.timestamp).unwrap_or_default();
        let contacts = event
            .points
            .iter()
            .map(|point| TouchContact {
                id: point.id,
                action: match point.state {
                    TouchPointState::Pressed => TouchAction::Down,
                    TouchPointState::Released => TouchAction::Up,
                    TouchPointState::Moved | TouchPointState::Stationary => TouchAction::Change,
                },
                tool: if point.is_pen { TouchTool::Stylus } else { TouchTool::Finger },
                x: point.x,
                y: point.y,
                pressure: point.pressure,
                touch_major: point.width,
                touch_minor: point.height,
            })
            .collect();

        TouchEvent {
            device_id: info.device_id,
            timestamp: event.timestamp,
            cookie: info.cookie,
            modifiers: event.modifiers,
            contacts,
        }
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_INFO_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::input::TouchPointInput;

    fn info(timestamp: Timestamp, device_id: DeviceId) -> EventInfo {
        EventInfo {
            timestamp,
            device_id,
            relative_x: 1.5,
            relative_y: -2.0,
            cookie: vec![device_id as u8],
        }
    }

    #[test]
    fn test_lookup_table_is_bounded() {
        let builder = EventBuilder::new(2);
        builder.store(info(10, 1));
        builder.store(info(20, 2));
        builder.store(info(30, 3));

        assert!(builder.find_info(10).is_none());
        assert_eq!(builder.find_info(20).map(|i| i.device_id), Some(2));
        assert_eq!(builder.find_info(30).map(|i| i.device_id), Some(3));
    }

    #[test]
    fn test_pointer_enriched_from_stored_info() {
        let builder = EventBuilder::default();
        builder.store(info(42, 7));

        let event = builder.pointer_from_mouse(&MouseInput {
            kind: MouseInputKind::Press,
            position: Point::new(3, 4),
            buttons: PointerButtons::PRIMARY,
            modifiers: Modifiers::SHIFT,
            timestamp: 42,
        });

        assert_eq!(event.device_id, 7);
        assert_eq!(event.action, PointerAction::ButtonDown);
        assert_eq!(event.relative_x, 1.5);
        assert_eq!(event.cookie, vec![7]);
    }

    #[test]
    fn test_synthetic_event_skips_lookup() {
        let builder = EventBuilder::default();
        builder.store(info(0, 9));

        let event = builder.pointer_from_hover(&HoverInput {
            kind: HoverInputKind::Move,
            position: Point::new(1, 1),
            modifiers: Modifiers::NONE,
            timestamp: 0,
        });
        assert_eq!(event.device_id, 0);
        assert_eq!(event.action, PointerAction::Motion);
    }

    #[test]
    fn test_wheel_steps() {
        let builder = EventBuilder::default();
        let event = builder.pointer_from_wheel(&WheelInput {
            position: Point::new(0, 0),
            angle_delta: Point::new(0, -240),
            buttons: PointerButtons::NONE,
            modifiers: Modifiers::NONE,
            timestamp: 0,
        });
        assert_eq!(event.vscroll, -2.0);
        assert_eq!(event.hscroll, 0.0);
    }

    #[test]
    fn test_auto_repeat_key() {
        let builder = EventBuilder::default();
        let event = builder.keyboard_from_key(&KeyInput {
            kind: KeyInputKind::Press,
            auto_repeat: true,
            native_virtual_key: 38,
            native_scan_code: 30,
            native_modifiers: Modifiers::NONE,
            timestamp: 0,
        });
        assert_eq!(event.action, KeyboardAction::Repeat);
    }

    #[test]
    fn test_touch_actions() {
        let builder = EventBuilder::default();
        let point = |id, state, is_pen| TouchPointInput {
            id,
            state,
            is_pen,
            x: 0.0,
            y: 0.0,
            pressure: 1.0,
            width: 2.0,
            height: 3.0,
        };
        let event = builder.touch_from(&TouchInput {
            modifiers: Modifiers::NONE,
            points: vec![
                point(0, TouchPointState::Pressed, false),
                point(1, TouchPointState::Stationary, true),
                point(2, TouchPointState::Released, false),
            ],
            timestamp: 0,
        });

        let actions: Vec<_> = event.contacts.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![TouchAction::Down, TouchAction::Change, TouchAction::Up]);
        assert_eq!(event.contacts[1].tool, TouchTool::Stylus);
        assert!(event.has_action(TouchAction::Down));
    }
}
