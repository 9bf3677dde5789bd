//! Controller port ($4016/$4017) implementation.
//!
//! See: <https://www.nesdev.org/wiki/Standard_controller>

use crate::common::{Reset, ResetKind};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[must_use]
#[error("failed to parse `Player`")]
pub struct ParsePlayerError;

/// Controller slot.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use]
pub enum Player {
    #[default]
    One,
    Two,
}

impl TryFrom<usize> for Player {
    type Error = ParsePlayerError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::One),
            1 => Ok(Self::Two),
            _ => Err(ParsePlayerError),
        }
    }
}

bitflags! {
    // Button bit order matches the serial report order: A is shifted out
    // first, Right last.
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[must_use]
    pub struct JoypadState: u8 {
        const A = 0x01;
        const B = 0x02;
        const SELECT = 0x04;
        const START = 0x08;
        const UP = 0x10;
        const DOWN = 0x20;
        const LEFT = 0x40;
        const RIGHT = 0x80;
    }
}

/// A standard controller: eight buttons latched into a shift register by the
/// $4016 strobe, shifted out one bit per read.
#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Joypad {
    pub buttons: JoypadState,
    shift: u8,
    strobe: bool,
}

impl Joypad {
    /// Latch the current button state into the shift register.
    const fn reload(&mut self) {
        self.shift = self.buttons.bits();
    }

    fn write_strobe(&mut self, high: bool) {
        // Buttons latch on the 1-to-0 edge; while the strobe is high the shift
        // register tracks the live button state
        if self.strobe && !high {
            self.reload();
        }
        self.strobe = high;
        if high {
            self.reload();
        }
    }

    /// Shift out the next report bit. After all eight buttons have been
    /// reported, official controllers return 1.
    pub fn read(&mut self) -> u8 {
        if self.strobe {
            return self.buttons.bits() & 0x01;
        }
        let bit = self.shift & 0x01;
        self.shift = (self.shift >> 1) | 0x80;
        bit
    }

    /// Side-effect-free variant of [`Joypad::read`].
    #[must_use]
    pub const fn peek(&self) -> u8 {
        if self.strobe {
            self.buttons.bits() & 0x01
        } else {
            self.shift & 0x01
        }
    }
}

/// Both controller ports.
#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Input {
    pub joypads: [Joypad; 2],
}

impl Input {
    pub const fn new() -> Self {
        Self {
            joypads: [
                Joypad {
                    buttons: JoypadState::empty(),
                    shift: 0,
                    strobe: false,
                },
                Joypad {
                    buttons: JoypadState::empty(),
                    shift: 0,
                    strobe: false,
                },
            ],
        }
    }

    pub fn set_button(&mut self, player: Player, button: JoypadState, pressed: bool) {
        self.joypads[player as usize].buttons.set(button, pressed);
    }

    pub fn set_joypad(&mut self, player: Player, state: JoypadState) {
        self.joypads[player as usize].buttons = state;
    }

    /// $4016 write: bit 0 drives the strobe line of both ports.
    pub fn write(&mut self, val: u8) {
        let high = val & 0x01 == 0x01;
        for joypad in &mut self.joypads {
            joypad.write_strobe(high);
        }
    }

    /// $4016/$4017 read: the next report bit for the given port.
    pub fn read(&mut self, player: Player) -> u8 {
        self.joypads[player as usize].read()
    }

    /// Side-effect-free variant of [`Input::read`].
    #[must_use]
    pub const fn peek(&self, player: Player) -> u8 {
        self.joypads[player as usize].peek()
    }
}

impl Reset for Input {
    fn reset(&mut self, _kind: ResetKind) {
        for joypad in &mut self.joypads {
            joypad.shift = 0x00;
            joypad.strobe = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strobe_latches_buttons_in_report_order() {
        let mut input = Input::new();
        input.set_button(Player::One, JoypadState::A, true);
        input.set_button(Player::One, JoypadState::START, true);

        input.write(0x01);
        input.write(0x00);

        let bits: Vec<u8> = (0..8).map(|_| input.read(Player::One)).collect();
        assert_eq!(bits, [1, 0, 0, 1, 0, 0, 0, 0], "A then START");
        assert_eq!(input.read(Player::One), 1, "reads past 8 report 1");
    }

    #[test]
    fn strobe_high_repeats_first_button() {
        let mut input = Input::new();
        input.set_button(Player::Two, JoypadState::A, true);
        input.write(0x01);
        for _ in 0..4 {
            assert_eq!(input.read(Player::Two), 1, "strobe held: always button A");
        }
    }
}
