#![doc = include_str!("../README.md")]

pub mod apu;
pub mod bus;
pub mod cart;
pub mod clock;
pub mod common;
pub mod console;
pub mod cpu;
pub mod debug;
pub mod dma;
pub mod input;
pub mod ppu;

pub mod prelude {
    //! Re-exports of the common structs/enums used for basic emulation.

    pub use crate::{
        apu::{Apu, Channel},
        cart::{CartMem, CartSignals, Cartridge},
        clock::MasterClock,
        common::{NesRegion, RamState, Regional, Reset, ResetKind},
        console::{Config, Console},
        cpu::Cpu,
        debug::{Breakpoint, BreakpointKind, Condition, Debugger, WatchKind, Watchpoint},
        input::{JoypadState, Player},
        ppu::{Mirroring, Ppu},
    };
}
