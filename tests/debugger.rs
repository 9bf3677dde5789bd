//! Debugger gate properties: side-effect-free inspection, halt/resume
//! semantics, triggers, and the bounded modification log.

use tickdeck_core::{
    cart::CartMem,
    debug::{Modification, Register},
    prelude::*,
};

fn console() -> Console {
    let mut console = Console::with_config(Config::default());
    let mut cart = Cartridge::test_ram();
    for addr in 0x8000..=0xFFFFu16 {
        cart.cpu_write(addr, 0xEA);
    }
    cart.cpu_write(0xFFFC, 0x00);
    cart.cpu_write(0xFFFD, 0x80);
    console.load_cart(cart);
    console.power_on();
    console
}

#[test]
fn inspection_is_side_effect_free() {
    let mut console = console();
    console.bus_write(0x0000, 0x5A);
    let open_bus = console.bus.open_bus;
    let vram_buffer = console.ppu.vram_buffer;
    let write_latch = console.ppu.scroll.write_latch;

    // Peeks across every interesting region, including the registers whose
    // reads normally carry side effects
    let _ = console.debug_read(0x2002);
    let _ = console.debug_read(0x2007);
    let _ = console.debug_read(0x4015);
    let _ = console.debug_read(0x4016);
    let mut buf = [0u8; 64];
    console.debug_read_range(0x1FF0, &mut buf);

    assert_eq!(console.bus.open_bus, open_bus, "open bus unchanged");
    assert_eq!(console.ppu.vram_buffer, vram_buffer, "read buffer unchanged");
    assert_eq!(
        console.ppu.scroll.write_latch, write_latch,
        "write toggle unchanged"
    );
}

#[test]
fn execute_breakpoint_pauses_and_resumes() {
    let mut console = console();
    let mut debugger = Debugger::default();
    debugger
        .add_breakpoint(Breakpoint::new(0x8004, BreakpointKind::Execute))
        .unwrap();
    console.attach_debugger(debugger);

    // Runs NOPs from $8000; must stop with PC at the breakpoint
    for _ in 0..200 {
        console.tick();
        if console.is_paused() {
            break;
        }
    }
    assert!(console.is_paused());
    assert_eq!(console.cpu.pc, 0x8004);
    let cycles = console.clock.cycles();
    console.tick();
    assert_eq!(console.clock.cycles(), cycles, "paused ticks are no-ops");

    console.continue_();
    for _ in 0..12 {
        console.tick();
    }
    assert!(console.cpu.pc > 0x8004, "execution moved past the breakpoint");
    let hit = console.debugger.as_ref().unwrap().breakpoints()[0].hit_count;
    assert_eq!(hit, 1);
}

#[test]
fn conditional_breakpoint_matches_register() {
    let mut console = console();
    let mut debugger = Debugger::default();
    debugger
        .add_breakpoint(
            Breakpoint::new(0x8002, BreakpointKind::Execute)
                .with_condition(Condition::AccEquals(0x42)),
        )
        .unwrap();
    console.attach_debugger(debugger);

    // First pass never touches the breakpoint address
    console.bus_write(0x0400, 0xA9);
    console.bus_write(0x0401, 0x42);
    console.bus_write(0x0402, 0xEA);
    console.cpu.pc = 0x0400;
    for _ in 0..60 {
        console.tick();
        if console.is_paused() {
            break;
        }
    }
    assert!(!console.is_paused(), "PC never matched the breakpoint");

    // Jump to the breakpoint address with A = $42; the check fires at the
    // next instruction boundary
    console.cpu.pc = 0x8002;
    console.cpu.acc = 0x42;
    for _ in 0..9 {
        console.tick();
        if console.is_paused() {
            break;
        }
    }
    assert!(console.is_paused());
}

#[test]
fn watchpoint_write_trigger() {
    let mut console = console();
    let mut debugger = Debugger::default();
    debugger
        .add_watchpoint(Watchpoint::new(0x0010, 1, WatchKind::Write))
        .unwrap();
    console.attach_debugger(debugger);

    // STA $10 with A = $7F
    console.bus_write(0x0400, 0xA9);
    console.bus_write(0x0401, 0x7F);
    console.bus_write(0x0402, 0x85);
    console.bus_write(0x0403, 0x10);
    console.cpu.pc = 0x0400;
    for _ in 0..30 {
        console.tick();
        if console.is_paused() {
            break;
        }
    }
    assert!(console.is_paused(), "write to the watched byte paused");
    assert_eq!(console.bus_peek(0x0010), 0x7F, "the write still landed");
}

#[test]
fn modification_log_is_bounded_and_recent() {
    let mut console = console();
    console.attach_debugger(Debugger::default());

    let total = 300usize;
    for i in 0..total {
        console.debug_write(0x0100 + i as u16, i as u8);
    }
    let debugger = console.debugger.as_ref().unwrap();
    let cap = Debugger::DEFAULT_MODIFICATION_CAP;
    assert_eq!(debugger.modification_count(), cap.min(total));

    // Oldest retained entry is number total - cap
    match debugger.modification(0).unwrap() {
        Modification::Memory { addr, .. } => {
            assert_eq!(*addr, 0x0100 + (total - cap) as u16);
        }
        other => panic!("unexpected entry: {other:?}"),
    }
}

#[test]
fn rom_writes_logged_as_intent() {
    let mut console = Console::with_config(Config::default());
    let mut prg = vec![0xEA; 0x8000];
    prg[0x7FFC] = 0x00;
    prg[0x7FFD] = 0x80;
    console.load_cart(Cartridge::nrom(prg, vec![], Mirroring::Vertical));
    console.power_on();
    console.attach_debugger(Debugger::default());

    console.debug_write(0x9000, 0x12); // PRG-ROM: storage unchanged
    let debugger = console.debugger.as_ref().unwrap();
    match debugger.modification(0).unwrap() {
        Modification::Memory {
            addr, rom_intent, ..
        } => {
            assert_eq!(*addr, 0x9000);
            assert!(*rom_intent, "logged as intent");
        }
        other => panic!("unexpected entry: {other:?}"),
    }
    assert_eq!(console.bus_peek(0x9000), 0xEA, "ROM unchanged");
}

#[test]
fn register_writes_are_logged() {
    let mut console = console();
    console.attach_debugger(Debugger::default());
    console.debug_set_register(Register::Acc, 0x77);
    assert_eq!(console.cpu.acc, 0x77);
    let debugger = console.debugger.as_ref().unwrap();
    match debugger.modification(0).unwrap() {
        Modification::Register { reg, new, .. } => {
            assert_eq!(*reg, Register::Acc);
            assert_eq!(*new, 0x77);
        }
        other => panic!("unexpected entry: {other:?}"),
    }
}

#[test]
fn history_capture_and_restore() {
    let mut console = console();
    console.attach_debugger(Debugger::default());

    console.cpu.acc = 0xAB;
    console.cpu.pc = 0x8010;
    console.debug_capture_history();
    console.cpu.acc = 0x00;
    console.cpu.pc = 0x9999;

    let snapshot = console.debug_restore_history(0).unwrap();
    assert_eq!(snapshot.acc, 0xAB);
    assert_eq!(console.cpu.acc, 0xAB);
    assert_eq!(console.cpu.pc, 0x8010);

    assert!(console.debug_restore_history(5).is_err(), "typed error");
}

#[test]
fn callback_receives_read_only_view() {
    fn break_on_cycle(console: &Console, userdata: u64) -> bool {
        console.clock.cycles() >= userdata
    }

    let mut console = console();
    let mut debugger = Debugger::default();
    debugger.add_callback(break_on_cycle, 30).unwrap();
    console.attach_debugger(debugger);

    for _ in 0..100 {
        console.tick();
        if console.is_paused() {
            break;
        }
    }
    assert!(console.is_paused());
    assert_eq!(console.clock.cycles(), 30, "paused on the callback's cycle");
}
