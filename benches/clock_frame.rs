use criterion::{criterion_group, criterion_main, Criterion};
use std::{hint::black_box, time::Duration};
use tickdeck_core::{cart::CartMem, prelude::*};

/// Build a console running a busy loop with rendering and NMIs enabled, so
/// every subsystem is exercised without needing a ROM image on disk.
fn busy_console() -> Console {
    let mut console = Console::with_config(Config::default());
    let mut cart = Cartridge::test_ram();
    let program: &[u8] = &[
        0xA9, 0x1E, // LDA #$1E
        0x8D, 0x01, 0x20, // STA $2001
        0xA9, 0x80, // LDA #$80
        0x8D, 0x00, 0x20, // STA $2000
        0xE6, 0x10, // INC $10
        0xAD, 0x02, 0x20, // LDA $2002
        0x4C, 0x0A, 0x80, // JMP $800A
    ];
    for (i, &byte) in program.iter().enumerate() {
        cart.cpu_write(0x8000 + i as u16, byte);
    }
    cart.cpu_write(0xFFFC, 0x00);
    cart.cpu_write(0xFFFD, 0x80);
    cart.cpu_write(0xFFFA, 0x00);
    cart.cpu_write(0xFFFB, 0x80);
    console.load_cart(cart);
    console.power_on();
    console
}

fn clock_frames(frames: u32) {
    let mut console = busy_console();
    for _ in 0..frames {
        console.emulate_frame();
    }
}

fn basic(c: &mut Criterion) {
    let mut group = c.benchmark_group("console");
    group.measurement_time(Duration::from_secs(30));
    group.sample_size(10);
    group.bench_function("clock_frame", |b| b.iter(|| clock_frames(black_box(60))));
    group.finish();
}

criterion_group!(benches, basic);
criterion_main!(benches);
