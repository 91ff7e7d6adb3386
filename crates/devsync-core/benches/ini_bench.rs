//! Criterion benchmarks for the settings-file codec and device matcher.
//!
//! The config store re-reads and rewrites the whole file on every save, and
//! the matcher runs on every poll tick, so both sit on the hot path of an
//! idle host.
//!
//! Run with:
//! ```bash
//! cargo bench --package devsync-core --bench ini_bench
//! ```

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use devsync_core::ini::{parse, render, ConfigRecord};
use devsync_core::{Device, DeviceMatcher};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_record(extra_sections: usize) -> ConfigRecord {
    let mut rec = ConfigRecord::new();
    rec.set("USB device", "device", "Raspberry Pi Pico");
    rec.set("USB device", "vendor_ids", "0xcafe, 0x239a, 0x2e8a, 0x303a");
    rec.set("watch", "directory", "/media/user/RPI-RP2");
    for i in 0..extra_sections {
        let section = format!("editor {i}");
        for k in 0..8 {
            rec.set(&section, &format!("key{k}"), &format!("value {i}.{k}"));
        }
    }
    rec
}

fn make_devices(n: usize) -> BTreeSet<Device> {
    (0..n)
        .map(|i| {
            Device::new(
                0xcafe,
                i as u16,
                format!("SN{i:04}"),
                format!("/media/dev{i}"),
                format!("Board {i}"),
            )
        })
        .collect()
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Benchmarks `parse` and `render` for a typical file and for files padded
/// with sections owned by other tools.
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("ini_codec");
    for extra in [0usize, 10, 100] {
        let rec = make_record(extra);
        let text = render(&rec);
        group.bench_with_input(BenchmarkId::new("parse", extra), &text, |b, text| {
            b.iter(|| parse(black_box(text)).expect("parse must succeed"))
        });
        group.bench_with_input(BenchmarkId::new("render", extra), &rec, |b, rec| {
            b.iter(|| render(black_box(rec)))
        });
    }
    group.finish();
}

/// Benchmarks a steady-state poll: the same candidates every tick.
fn bench_matcher_steady_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("matcher_resolve");
    for n in [1usize, 4, 16] {
        let devices = make_devices(n);
        let mut matcher = DeviceMatcher::new();
        let first = matcher.resolve(&devices, None);
        let previous = first.device.map(|d| d.id().clone());
        group.bench_with_input(BenchmarkId::new("devices", n), &devices, |b, devices| {
            b.iter(|| matcher.resolve(black_box(devices), previous.as_ref()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codec, bench_matcher_steady_state);
criterion_main!(benches);
