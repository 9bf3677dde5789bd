//! Debugger inspection gate.
//!
//! The gate is consulted at the start of every tick and at every bus access.
//! It never mutates core runtime state except through the explicit write API,
//! and the core never mutates gate data structures. Inspection goes through
//! the side-effect-free peek path, enforced at the type level by the `&`
//! references the check methods take.
//!
//! All storage is pre-allocated at attach time; `should_break` and
//! `check_memory_access` allocate nothing.

use crate::{console::Console, cpu::Status};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors the gate can return from its registration and history APIs.
#[derive(Error, Debug, PartialEq, Eq)]
#[must_use]
pub enum Error {
    #[error("breakpoint capacity ({0}) exhausted")]
    BreakpointLimit(usize),
    #[error("watchpoint capacity ({0}) exhausted")]
    WatchpointLimit(usize),
    #[error("callback capacity ({0}) exhausted")]
    CallbackLimit(usize),
    #[error("no such breakpoint: {0}")]
    UnknownBreakpoint(usize),
    #[error("no history entry at slot {0}")]
    HistoryIndex(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

/// User callback with opaque userdata, run by `should_break` with a
/// read-only view of the console.
pub type BreakCallback = fn(&Console, u64) -> bool;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum BreakpointKind {
    Execute,
    Read,
    Write,
    Access,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum WatchKind {
    Read,
    Write,
    Change,
}

/// Optional register condition attached to a breakpoint, e.g. "A == $42".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum Condition {
    AccEquals(u8),
    XEquals(u8),
    YEquals(u8),
    SpEquals(u8),
    StatusContains(u8),
}

impl Condition {
    #[must_use]
    pub fn evaluate(&self, console: &Console) -> bool {
        let cpu = &console.cpu;
        match *self {
            Self::AccEquals(val) => cpu.acc == val,
            Self::XEquals(val) => cpu.x == val,
            Self::YEquals(val) => cpu.y == val,
            Self::SpEquals(val) => cpu.sp == val,
            Self::StatusContains(bits) => cpu.status.contains(Status::from_bits_truncate(bits)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Breakpoint {
    pub addr: u16,
    pub kind: BreakpointKind,
    pub enabled: bool,
    pub condition: Option<Condition>,
    pub hit_count: u64,
}

impl Breakpoint {
    pub const fn new(addr: u16, kind: BreakpointKind) -> Self {
        Self {
            addr,
            kind,
            enabled: true,
            condition: None,
            hit_count: 0,
        }
    }

    pub const fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Watchpoint {
    pub addr: u16,
    pub len: u16,
    pub kind: WatchKind,
    /// Last value seen at `addr`, compared by `Change` triggers.
    pub old_value: u8,
}

impl Watchpoint {
    pub const fn new(addr: u16, len: u16, kind: WatchKind) -> Self {
        Self {
            addr,
            len,
            kind,
            old_value: 0x00,
        }
    }

    const fn covers(&self, addr: u16) -> bool {
        addr >= self.addr && (addr as u32) < self.addr as u32 + self.len as u32
    }
}

/// CPU + clock snapshot captured into the history ring.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct CpuSnapshot {
    pub pc: u16,
    pub acc: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub status: Status,
    pub ppu_cycle: u64,
}

/// Register names for the modification log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum Register {
    Acc,
    X,
    Y,
    Sp,
    Pc,
    Status,
}

/// One entry of the modification log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum Modification {
    Memory {
        addr: u16,
        old: u8,
        new: u8,
        cycle: u64,
        /// The write targeted a ROM region: the intent is logged even though
        /// storage did not change.
        rom_intent: bool,
    },
    Register {
        reg: Register,
        old: u16,
        new: u16,
        cycle: u64,
    },
}

/// Fixed-capacity ring that overwrites its oldest entry when full.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Ring<T> {
    items: Vec<T>,
    cap: usize,
    start: usize,
}

impl<T: Copy> Ring<T> {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
            cap,
            start: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() < self.cap {
            self.items.push(item);
        } else {
            self.items[self.start] = item;
            self.start = (self.start + 1) % self.cap;
        }
    }

    /// Logical index: 0 is the oldest retained entry.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.items.len() {
            return None;
        }
        self.items.get((self.start + index) % self.items.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.start = 0;
    }
}

/// The debugger gate: breakpoints, watchpoints, user callbacks, execution
/// history, and the modification log.
#[derive(Clone)]
#[must_use]
pub struct Debugger {
    /// Halt latch: while set, `tick()` is a no-op until `continue_()`.
    pub paused: bool,
    breakpoints: Vec<Breakpoint>,
    watchpoints: Vec<Watchpoint>,
    callbacks: Vec<(BreakCallback, u64)>,
    history: Ring<CpuSnapshot>,
    modifications: Ring<Modification>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HISTORY_CAP, Self::DEFAULT_MODIFICATION_CAP)
    }
}

impl Debugger {
    /// Fixed capacity of the breakpoint and watchpoint sets.
    pub const MAX_BREAKPOINTS: usize = 256;
    pub const MAX_WATCHPOINTS: usize = 256;
    pub const MAX_CALLBACKS: usize = 16;
    pub const DEFAULT_HISTORY_CAP: usize = 256;
    pub const DEFAULT_MODIFICATION_CAP: usize = 256;

    pub fn new(history_cap: usize, modification_cap: usize) -> Self {
        Self {
            paused: false,
            breakpoints: Vec::with_capacity(Self::MAX_BREAKPOINTS),
            watchpoints: Vec::with_capacity(Self::MAX_WATCHPOINTS),
            callbacks: Vec::with_capacity(Self::MAX_CALLBACKS),
            history: Ring::with_capacity(history_cap),
            modifications: Ring::with_capacity(modification_cap),
        }
    }

    /// Register a breakpoint. Fails without modification when the
    /// fixed-capacity set is full.
    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) -> Result<usize> {
        if self.breakpoints.len() >= Self::MAX_BREAKPOINTS {
            return Err(Error::BreakpointLimit(Self::MAX_BREAKPOINTS));
        }
        self.breakpoints.push(breakpoint);
        Ok(self.breakpoints.len() - 1)
    }

    pub fn remove_breakpoint(&mut self, index: usize) -> Result<Breakpoint> {
        if index >= self.breakpoints.len() {
            return Err(Error::UnknownBreakpoint(index));
        }
        Ok(self.breakpoints.remove(index))
    }

    pub fn set_breakpoint_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let bp = self
            .breakpoints
            .get_mut(index)
            .ok_or(Error::UnknownBreakpoint(index))?;
        bp.enabled = enabled;
        Ok(())
    }

    #[must_use]
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Register a watchpoint. Fails without modification when the
    /// fixed-capacity set is full.
    pub fn add_watchpoint(&mut self, watchpoint: Watchpoint) -> Result<usize> {
        if self.watchpoints.len() >= Self::MAX_WATCHPOINTS {
            return Err(Error::WatchpointLimit(Self::MAX_WATCHPOINTS));
        }
        self.watchpoints.push(watchpoint);
        Ok(self.watchpoints.len() - 1)
    }

    #[must_use]
    pub fn watchpoints(&self) -> &[Watchpoint] {
        &self.watchpoints
    }

    /// Register a user callback run by `should_break` with a read-only view
    /// of the console and the given userdata.
    pub fn add_callback(&mut self, callback: BreakCallback, userdata: u64) -> Result<()> {
        if self.callbacks.len() >= Self::MAX_CALLBACKS {
            return Err(Error::CallbackLimit(Self::MAX_CALLBACKS));
        }
        self.callbacks.push((callback, userdata));
        Ok(())
    }

    /// Consulted at the start of each tick. Checks execute-type breakpoints
    /// against PC at instruction boundaries and runs the user callbacks.
    /// Allocation-free.
    pub fn should_break(&mut self, console: &Console) -> bool {
        let mut hit = false;
        if console.cpu.at_instr_boundary() {
            let pc = console.cpu.pc;
            for bp in &mut self.breakpoints {
                if bp.enabled
                    && bp.kind == BreakpointKind::Execute
                    && bp.addr == pc
                    && bp.condition.map_or(true, |cond| cond.evaluate(console))
                {
                    bp.hit_count += 1;
                    hit = true;
                }
            }
        }
        for (callback, userdata) in &self.callbacks {
            if callback(console, *userdata) {
                hit = true;
            }
        }
        hit
    }

    /// Consulted at every bus access. Checks read/write/access breakpoints
    /// and watchpoint triggers. Allocation-free.
    pub fn check_memory_access(
        &mut self,
        console: &Console,
        addr: u16,
        value: u8,
        is_write: bool,
    ) -> bool {
        let mut hit = false;
        for bp in &mut self.breakpoints {
            if !bp.enabled || bp.addr != addr {
                continue;
            }
            let kind_matches = match bp.kind {
                BreakpointKind::Execute => false,
                BreakpointKind::Read => !is_write,
                BreakpointKind::Write => is_write,
                BreakpointKind::Access => true,
            };
            if kind_matches && bp.condition.map_or(true, |cond| cond.evaluate(console)) {
                bp.hit_count += 1;
                hit = true;
            }
        }
        for wp in &mut self.watchpoints {
            if !wp.covers(addr) {
                continue;
            }
            match wp.kind {
                WatchKind::Read => hit |= !is_write,
                WatchKind::Write => hit |= is_write,
                WatchKind::Change => {
                    if is_write && value != wp.old_value {
                        wp.old_value = value;
                        hit = true;
                    }
                }
            }
        }
        hit
    }

    /// Capture the CPU register file into the history ring.
    pub fn capture_history(&mut self, console: &Console) {
        self.history.push(CpuSnapshot {
            pc: console.cpu.pc,
            acc: console.cpu.acc,
            x: console.cpu.x,
            y: console.cpu.y,
            sp: console.cpu.sp,
            status: console.cpu.status,
            ppu_cycle: console.clock.cycles(),
        });
    }

    /// Fetch a snapshot from the history ring; slot 0 is the oldest retained
    /// entry.
    pub fn history_snapshot(&self, slot: usize) -> Result<CpuSnapshot> {
        self.history
            .get(slot)
            .copied()
            .ok_or(Error::HistoryIndex(slot))
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub(crate) fn log_modification(&mut self, modification: Modification) {
        self.modifications.push(modification);
    }

    #[must_use]
    pub fn modification(&self, index: usize) -> Option<&Modification> {
        self.modifications.get(index)
    }

    #[must_use]
    pub fn modification_count(&self) -> usize {
        self.modifications.len()
    }
}

impl std::fmt::Debug for Debugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debugger")
            .field("paused", &self.paused)
            .field("breakpoints", &self.breakpoints.len())
            .field("watchpoints", &self.watchpoints.len())
            .field("callbacks", &self.callbacks.len())
            .field("history", &self.history.len())
            .field("modifications", &self.modifications.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_capacity_is_fixed() {
        let mut debugger = Debugger::default();
        for addr in 0..Debugger::MAX_BREAKPOINTS as u16 {
            debugger
                .add_breakpoint(Breakpoint::new(addr, BreakpointKind::Execute))
                .unwrap();
        }
        let err = debugger
            .add_breakpoint(Breakpoint::new(0xFFFF, BreakpointKind::Execute))
            .unwrap_err();
        assert_eq!(err, Error::BreakpointLimit(Debugger::MAX_BREAKPOINTS));
        assert_eq!(
            debugger.breakpoints().len(),
            Debugger::MAX_BREAKPOINTS,
            "state unchanged on failure"
        );
    }

    #[test]
    fn ring_keeps_most_recent_entries() {
        let mut ring: Ring<u32> = Ring::with_capacity(4);
        for i in 0..10 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 4);
        let entries: Vec<u32> = (0..4).map(|i| *ring.get(i).unwrap()).collect();
        assert_eq!(entries, [6, 7, 8, 9], "oldest overwritten first");
        assert!(ring.get(4).is_none());
    }

    #[test]
    fn history_restore_out_of_range_is_typed_error() {
        let debugger = Debugger::default();
        assert_eq!(debugger.history_snapshot(0), Err(Error::HistoryIndex(0)));
    }
}
