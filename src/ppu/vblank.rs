//! VBlank & NMI edge ledger.
//!
//! The ledger is the cycle-stamped record that decouples the *readable*
//! VBlank bit of $2002 from the *latched* NMI edge driving the CPU. Reading
//! $2002 hides the flag but never clears a latched edge; only the CPU
//! beginning its NMI sequence acknowledges it. A $2002 read landing on the
//! exact set cycle suppresses both the flag and the edge for that frame.
//!
//! See: <https://www.nesdev.org/wiki/NMI>

use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct VblankLedger {
    /// The PPU is inside the VBlank span (scanline 241 dot 1 through
    /// pre-render dot 1), independent of flag visibility.
    pub span_active: bool,
    /// A 0-to-1 NMI condition was latched and not yet acknowledged by the CPU.
    /// Persists across span end and $2002 reads.
    pub nmi_edge_pending: bool,
    /// Whether the VBlank bit currently reads back as set.
    visible: bool,
    /// Master-cycle stamps of the interesting transitions.
    pub last_set: u64,
    pub last_clear: u64,
    pub last_status_read: u64,
    pub last_ctrl_toggle: u64,
    pub last_cpu_ack: u64,
    /// One-shot: a $2002 read in the race window arms suppression of a
    /// VBlank set landing on exactly this cycle.
    prevent_vbl_set_cycle: Option<u64>,
}

impl VblankLedger {
    pub const fn new() -> Self {
        Self {
            span_active: false,
            nmi_edge_pending: false,
            visible: false,
            last_set: 0,
            last_clear: 0,
            last_status_read: 0,
            last_ctrl_toggle: 0,
            last_cpu_ack: 0,
            prevent_vbl_set_cycle: None,
        }
    }

    /// Whether the VBlank bit reads back as set.
    #[inline]
    #[must_use]
    pub const fn vblank_visible(&self) -> bool {
        self.visible
    }

    /// Arm the race-window one-shot: a VBlank set landing on `cycle` will be
    /// suppressed.
    pub fn arm_race_suppression(&mut self, cycle: u64) {
        trace!("$2002 read armed VBL suppression - CYC:{cycle}");
        self.prevent_vbl_set_cycle = Some(cycle);
    }

    /// The PPU reached scanline 241 dot 1.
    pub fn record_vblank_set(&mut self, cycle: u64, nmi_enabled: bool) {
        let was_active = self.span_active;
        self.span_active = true;
        self.last_set = cycle;
        if self.prevent_vbl_set_cycle.take() == Some(cycle) {
            // A $2002 read on the set cycle: the flag never becomes visible
            // and no edge latches this frame
            trace!("VBL set suppressed by $2002 race - CYC:{cycle}");
            return;
        }
        self.visible = true;
        if !was_active && nmi_enabled {
            trace!("VBL NMI edge latched - CYC:{cycle}");
            self.nmi_edge_pending = true;
        }
    }

    /// The readable flag goes away without the span ending.
    pub fn record_vblank_clear(&mut self, cycle: u64) {
        self.last_clear = cycle;
        self.visible = false;
    }

    /// Pre-render clearing: the VBlank span is over. The latched edge, if
    /// any, survives until the CPU acknowledges it.
    pub fn record_vblank_span_end(&mut self, cycle: u64) {
        self.span_active = false;
        self.last_clear = cycle;
        self.visible = false;
    }

    /// The CPU read $2002: the flag hides, the edge stays latched.
    pub fn record_status_read(&mut self, cycle: u64) {
        self.last_status_read = cycle;
        self.last_clear = cycle;
        self.visible = false;
    }

    /// PPUCTRL bit 7 changed. Toggling NMI on mid-span latches a fresh edge,
    /// so multiple toggles interleaved with acknowledges yield multiple NMIs.
    pub fn record_ctrl_toggle(&mut self, cycle: u64, old_enabled: bool, new_enabled: bool) {
        self.last_ctrl_toggle = cycle;
        if !old_enabled && new_enabled && self.span_active {
            trace!("$2000 NMI toggle latched edge mid-VBL - CYC:{cycle}");
            self.nmi_edge_pending = true;
        }
    }

    /// The CPU began its NMI sequence.
    pub fn acknowledge_cpu(&mut self, cycle: u64) {
        trace!("CPU acknowledged NMI - CYC:{cycle}");
        self.last_cpu_ack = cycle;
        self.nmi_edge_pending = false;
    }

    /// Level the CPU's NMI input should see this cycle.
    #[inline]
    #[must_use]
    pub const fn should_assert_nmi_line(&self, nmi_enabled: bool) -> bool {
        nmi_enabled && self.nmi_edge_pending && self.last_status_read != self.last_set
    }
}

impl crate::common::Reset for VblankLedger {
    fn reset(&mut self, _kind: crate::common::ResetKind) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_persists_across_span_end_until_ack() {
        let mut ledger = VblankLedger::new();
        ledger.record_vblank_set(100, true);
        assert!(ledger.nmi_edge_pending);
        assert!(ledger.vblank_visible());

        ledger.record_vblank_span_end(200);
        assert!(!ledger.span_active);
        assert!(!ledger.vblank_visible());
        assert!(ledger.nmi_edge_pending, "edge survives span end");
        assert!(ledger.should_assert_nmi_line(true));

        ledger.acknowledge_cpu(210);
        assert!(!ledger.nmi_edge_pending, "only the CPU ack clears the edge");
        assert!(!ledger.should_assert_nmi_line(true));
    }

    #[test]
    fn status_read_hides_flag_but_keeps_edge() {
        let mut ledger = VblankLedger::new();
        ledger.record_vblank_set(100, true);
        ledger.record_status_read(150);
        assert!(!ledger.vblank_visible(), "read hides the flag");
        assert!(ledger.span_active, "read does not end the span");
        assert!(ledger.nmi_edge_pending, "read does not clear the edge");
        assert!(
            ledger.should_assert_nmi_line(true),
            "read at a different cycle than the set does not suppress"
        );
    }

    #[test]
    fn same_cycle_read_suppresses_set_and_edge() {
        let mut ledger = VblankLedger::new();
        ledger.arm_race_suppression(100);
        ledger.record_vblank_set(100, true);
        assert!(ledger.span_active, "the span still begins");
        assert!(!ledger.vblank_visible(), "flag set suppressed");
        assert!(!ledger.nmi_edge_pending, "edge latch suppressed");
        assert!(!ledger.should_assert_nmi_line(true));
    }

    #[test]
    fn suppression_one_shot_misses_other_cycles() {
        let mut ledger = VblankLedger::new();
        ledger.arm_race_suppression(99);
        ledger.record_vblank_set(100, true);
        assert!(ledger.vblank_visible(), "stale one-shot has no effect");
        assert!(ledger.nmi_edge_pending);

        // The one-shot was consumed either way
        ledger.record_vblank_span_end(200);
        ledger.acknowledge_cpu(201);
        ledger.record_vblank_set(300, true);
        assert!(ledger.vblank_visible());
    }

    #[test]
    fn ctrl_toggle_mid_span_latches_new_edge() {
        let mut ledger = VblankLedger::new();
        ledger.record_vblank_set(100, false);
        assert!(!ledger.nmi_edge_pending, "NMI disabled at set time");

        ledger.record_ctrl_toggle(120, false, true);
        assert!(ledger.nmi_edge_pending, "0-to-1 toggle mid-span latches");

        ledger.acknowledge_cpu(130);
        ledger.record_ctrl_toggle(140, true, false);
        ledger.record_ctrl_toggle(150, false, true);
        assert!(ledger.nmi_edge_pending, "re-toggle latches a second edge");
    }

    #[test]
    fn toggle_outside_span_does_not_latch() {
        let mut ledger = VblankLedger::new();
        ledger.record_ctrl_toggle(10, false, true);
        assert!(!ledger.nmi_edge_pending);
    }
}
