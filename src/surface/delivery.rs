//! Input delivery from the UI scene to the client

use super::Surface;
use crate::input::{
    DeviceId, HoverInput, KeyInput, KeyboardAction, Modifiers, MouseInput, Timestamp, TouchInput, WheelInput,
};

/// A key the surface has forwarded a press for but no release yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressedKey {
    pub native_virtual_key: u32,
    pub native_scan_code: u32,
    pub timestamp: Timestamp,
    pub msecs_since_reference: i64,
    pub device_id: DeviceId,
}

impl Surface {
    pub fn key_press(&self, event: &KeyInput) {
        if !event.auto_repeat {
            let device_id = self.input.find_info(event.timestamp).map(|i| i.device_id).unwrap_or(0);
            let pressed = PressedKey {
                native_virtual_key: event.native_virtual_key,
                native_scan_code: event.native_scan_code,
                timestamp: event.timestamp,
                msecs_since_reference: self.clock.msecs_since_reference(),
                device_id,
            };
            let mut ui = self.ui.lock();
            ui.pressed_keys.retain(|k| k.native_virtual_key != event.native_virtual_key);
            ui.pressed_keys.push(pressed);
        }

        let keyboard = self.input.keyboard_from_key(event);
        self.controller.deliver_keyboard_event(self.id, keyboard);
    }

    /// Forwards a release only for keys whose press went to this client
    pub fn key_release(&self, event: &KeyInput) {
        let was_pressed = {
            let mut ui = self.ui.lock();
            match ui
                .pressed_keys
                .iter()
                .position(|k| k.native_virtual_key == event.native_virtual_key)
            {
                Some(index) => {
                    ui.pressed_keys.remove(index);
                    true
                }
                None => false,
            }
        };
        if was_pressed {
            let keyboard = self.input.keyboard_from_key(event);
            self.controller.deliver_keyboard_event(self.id, keyboard);
        }
    }

    pub fn pressed_keys(&self) -> Vec<PressedKey> {
        self.ui.lock().pressed_keys.clone()
    }

    /// Sends a synthetic release for every key still held, stamped as if it
    /// happened now
    pub(super) fn release_all_pressed_keys(&self) {
        let pressed = std::mem::take(&mut self.ui.lock().pressed_keys);
        let now = self.clock.msecs_since_reference();

        for key in pressed {
            let elapsed = (now - key.msecs_since_reference).max(0) as u64;
            let event = self.input.make_key_event(
                key.device_id,
                key.timestamp + elapsed,
                Vec::new(),
                KeyboardAction::Up,
                key.native_virtual_key,
                key.native_scan_code,
                Modifiers::NONE,
            );
            self.controller.deliver_keyboard_event(self.id, event);
        }
    }

    pub fn mouse_event(&self, event: &MouseInput) {
        let pointer = self.input.pointer_from_mouse(event);
        self.controller.deliver_pointer_event(self.id, pointer);
    }

    pub fn hover_event(&self, event: &HoverInput) {
        let pointer = self.input.pointer_from_hover(event);
        self.controller.deliver_pointer_event(self.id, pointer);
    }

    pub fn wheel_event(&self, event: &WheelInput) {
        let pointer = self.input.pointer_from_wheel(event);
        self.controller.deliver_pointer_event(self.id, pointer);
    }

    pub fn touch_event(&self, event: &TouchInput) {
        let touch = self.input.touch_from(event);
        self.controller.deliver_touch_event(self.id, touch);
    }
}
