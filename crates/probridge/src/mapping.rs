//! Translation of a decoded state report into the Xbox gamepad model.
//!
//! Pure functions only; no I/O. The worker runs [`translate`] on every state
//! report it pulls and publishes the result to the cache.

use crate::gamepad::{BatteryInfo, BatteryLevel, BatteryType, GamepadState, buttons};
use crate::protocol::{FullStates, ProButton};

/// Calibration of one raw 12-bit axis.
///
/// Fixed values measured from a USB-connected Pro controller; there is no
/// run-time calibration path.
#[derive(Debug, Clone, Copy)]
pub struct AxisRange {
    pub min: u16,
    pub neutral: u16,
    pub max: u16,
}

pub const LEFT_X: AxisRange = AxisRange { min: 0x220, neutral: 0x7E0, max: 0xE20 };
pub const LEFT_Y: AxisRange = AxisRange { min: 0x1B0, neutral: 0x7A0, max: 0xE20 };
pub const RIGHT_X: AxisRange = AxisRange { min: 0x230, neutral: 0x800, max: 0xE00 };
pub const RIGHT_Y: AxisRange = AxisRange { min: 0x150, neutral: 0x770, max: 0xE20 };

/// Remaps a raw 12-bit axis sample onto the full signed 16-bit range.
///
/// The raw value is clamped to the axis bounds, offset by the neutral point
/// and scaled so that `min → -0x8000`, `neutral → 0` and `max → 0x7FFF`,
/// rounding to nearest.
pub fn remap_axis(range: AxisRange, raw: u16) -> i16 {
    let clamped = raw.clamp(range.min, range.max);
    let offset = i32::from(clamped) - i32::from(range.neutral);
    if offset > 0 {
        let span = i32::from(range.max) - i32::from(range.neutral);
        ((offset as f32) * 0x7FFF as f32 / span as f32).round() as i16
    } else if offset < 0 {
        let span = i32::from(range.neutral) - i32::from(range.min);
        ((offset as f32) * 0x8000 as f32 / span as f32).round() as i16
    } else {
        0
    }
}

/// Pro button bit → Xbox button bit.
///
/// The face buttons are swapped on purpose: the Pro controller's lettering
/// is mirrored relative to an Xbox pad, and games expect the *physical*
/// position to match. Home, Share and the digital triggers have no place in
/// the bitmask (the triggers surface as analog trigger values instead).
const BUTTON_MAP: [(ProButton, u16); 14] = [
    (ProButton::Y, buttons::X),
    (ProButton::X, buttons::Y),
    (ProButton::B, buttons::A),
    (ProButton::A, buttons::B),
    (ProButton::R, buttons::RIGHT_SHOULDER),
    (ProButton::Minus, buttons::BACK),
    (ProButton::Plus, buttons::START),
    (ProButton::StickR, buttons::RIGHT_THUMB),
    (ProButton::StickL, buttons::LEFT_THUMB),
    (ProButton::Down, buttons::DPAD_DOWN),
    (ProButton::Up, buttons::DPAD_UP),
    (ProButton::Right, buttons::DPAD_RIGHT),
    (ProButton::Left, buttons::DPAD_LEFT),
    (ProButton::L, buttons::LEFT_SHOULDER),
];

/// Battery nibble (0..=8) → XInput charge bucket.
fn battery_level(raw: u8) -> BatteryLevel {
    if raw >= 7 {
        BatteryLevel::Full
    } else if raw >= 4 {
        BatteryLevel::Medium
    } else if raw >= 1 {
        BatteryLevel::Low
    } else {
        BatteryLevel::Empty
    }
}

/// Translates one state report into the published gamepad + battery records.
pub fn translate(states: &FullStates) -> (GamepadState, BatteryInfo) {
    let mut pad = GamepadState {
        packet_number: u32::from(states.timestamp),
        ..GamepadState::default()
    };

    pad.thumb_lx = remap_axis(LEFT_X, states.left_stick.0);
    pad.thumb_ly = remap_axis(LEFT_Y, states.left_stick.1);
    pad.thumb_rx = remap_axis(RIGHT_X, states.right_stick.0);
    pad.thumb_ry = remap_axis(RIGHT_Y, states.right_stick.1);

    // The Pro controller's triggers are switches, not analog axes.
    pad.left_trigger = if states.pressed(ProButton::Zl) { 0xFF } else { 0 };
    pad.right_trigger = if states.pressed(ProButton::Zr) { 0xFF } else { 0 };

    for (pro, xbox) in BUTTON_MAP {
        if states.pressed(pro) {
            pad.buttons |= xbox;
        }
    }

    let battery = BatteryInfo {
        kind: BatteryType::Nimh,
        level: battery_level(states.battery_raw()),
    };
    (pad, battery)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral_states() -> FullStates {
        FullStates {
            timestamp: 0,
            battery_and_wired: 0,
            keys: 0,
            left_stick: (LEFT_X.neutral, LEFT_Y.neutral),
            right_stick: (RIGHT_X.neutral, RIGHT_Y.neutral),
            vibration: 0,
        }
    }

    #[test]
    fn remap_endpoints() {
        for range in [LEFT_X, LEFT_Y, RIGHT_X, RIGHT_Y] {
            assert_eq!(remap_axis(range, range.neutral), 0);
            assert_eq!(remap_axis(range, range.max), 0x7FFF);
            assert_eq!(remap_axis(range, range.min), -0x8000);
        }
    }

    #[test]
    fn remap_clamps_out_of_range_samples() {
        assert_eq!(remap_axis(LEFT_X, 0x000), -0x8000);
        assert_eq!(remap_axis(LEFT_X, 0xFFF), 0x7FFF);
    }

    #[test]
    fn remap_midpoints_land_near_half_scale() {
        let up = LEFT_X.neutral + (LEFT_X.max - LEFT_X.neutral) / 2;
        let v = remap_axis(LEFT_X, up);
        assert!((0x3FFE..=0x4001).contains(&v), "got {v:#X}");

        let down = LEFT_X.neutral - (LEFT_X.neutral - LEFT_X.min) / 2;
        let v = remap_axis(LEFT_X, down);
        assert!((-0x4001..=-0x3FFE).contains(&v), "got {v:#X}");
    }

    #[test]
    fn neutral_report_translates_to_neutral_pad() {
        let (pad, battery) = translate(&neutral_states());
        assert_eq!(pad, GamepadState::default());
        assert_eq!(battery.kind, BatteryType::Nimh);
        assert_eq!(battery.level, BatteryLevel::Empty);
    }

    #[test]
    fn face_buttons_are_position_swapped() {
        let cases = [
            (ProButton::Y, buttons::X),
            (ProButton::X, buttons::Y),
            (ProButton::B, buttons::A),
            (ProButton::A, buttons::B),
        ];
        for (pro, xbox) in cases {
            let mut states = neutral_states();
            states.keys = 1 << pro as u8;
            let (pad, _) = translate(&states);
            assert_eq!(pad.buttons, xbox, "{pro:?}");
        }
    }

    #[test]
    fn every_mapped_button_sets_exactly_its_bit() {
        for (pro, xbox) in BUTTON_MAP {
            let mut states = neutral_states();
            states.keys = 1 << pro as u8;
            let (pad, _) = translate(&states);
            assert_eq!(pad.buttons, xbox, "{pro:?}");
        }
    }

    #[test]
    fn unmapped_buttons_stay_out_of_the_bitmask() {
        for pro in [ProButton::Home, ProButton::Share, ProButton::Zl, ProButton::Zr] {
            let mut states = neutral_states();
            states.keys = 1 << pro as u8;
            let (pad, _) = translate(&states);
            assert_eq!(pad.buttons, 0, "{pro:?}");
        }
    }

    #[test]
    fn triggers_are_binary() {
        let mut states = neutral_states();
        states.keys = 1 << ProButton::Zl as u8;
        let (pad, _) = translate(&states);
        assert_eq!(pad.left_trigger, 0xFF);
        assert_eq!(pad.right_trigger, 0);
        assert_eq!(pad.buttons, 0);

        states.keys = 1 << ProButton::Zr as u8;
        let (pad, _) = translate(&states);
        assert_eq!(pad.right_trigger, 0xFF);
        assert_eq!(pad.left_trigger, 0);
    }

    #[test]
    fn right_stick_full_deflection() {
        let mut states = neutral_states();
        states.keys = 1 << ProButton::A as u8;
        states.right_stick = (RIGHT_X.max, RIGHT_Y.neutral);
        let (pad, _) = translate(&states);
        assert_eq!(pad.buttons, buttons::B);
        assert_eq!(pad.thumb_rx, 0x7FFF);
        assert_eq!(pad.thumb_ry, 0);
    }

    #[test]
    fn battery_buckets() {
        let cases = [
            (0u8, BatteryLevel::Empty),
            (1, BatteryLevel::Low),
            (3, BatteryLevel::Low),
            (4, BatteryLevel::Medium),
            (6, BatteryLevel::Medium),
            (7, BatteryLevel::Full),
            (8, BatteryLevel::Full),
        ];
        for (raw, expected) in cases {
            assert_eq!(battery_level(raw), expected, "raw nibble {raw}");
        }
    }

    #[test]
    fn wired_flag_in_low_nibble_does_not_disturb_level() {
        let mut states = neutral_states();
        states.battery_and_wired = 0x81;
        let (_, battery) = translate(&states);
        assert_eq!(battery.level, BatteryLevel::Full);
        assert_eq!(battery.kind, BatteryType::Nimh);
    }

    #[test]
    fn packet_number_carries_the_report_counter() {
        let mut states = neutral_states();
        states.timestamp = 0xFE;
        let (pad, _) = translate(&states);
        assert_eq!(pad.packet_number, 0xFE);
    }
}
