//! Criterion benchmarks for the LAN packet codec.
//!
//! The dispatch loop decodes every datagram on the LAN port, including
//! broadcast chatter from other clients, so decode cost is on the hot path.
//!
//! Run with:
//! ```bash
//! cargo bench --package lifx-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lifx_core::protocol::codec::{decode_packet, encode_packet, Packet};
use lifx_core::protocol::messages::{power_level, Message, SERVICE_UDP};
use lifx_core::Color;

// ── Packet fixtures ───────────────────────────────────────────────────────────

fn targeted(msg: Message) -> Packet {
    let mut pkt = Packet::new(&msg);
    pkt.source = 0x1234_5678;
    pkt.target = 0x0000_2211_00d5_73d0;
    pkt.sequence = 42;
    pkt.res_required = true;
    pkt
}

fn fixtures() -> Vec<(&'static str, Packet)> {
    vec![
        ("GetService", Packet::new(&Message::GetService)),
        (
            "StateService",
            targeted(Message::StateService {
                service: SERVICE_UDP,
                port: 56700,
            }),
        ),
        (
            "StatePower",
            targeted(Message::StatePower {
                level: power_level(true),
            }),
        ),
        (
            "LightSetColor",
            targeted(Message::LightSetColor {
                color: Color::new(21845, 65535, 32768, 3500),
                duration_ms: 500,
            }),
        ),
        (
            "LightState",
            targeted(Message::LightState {
                color: Color::new(21845, 65535, 32768, 3500),
                power: power_level(true),
                label: "Living Room".to_string(),
            }),
        ),
    ]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_packet");
    for (name, pkt) in fixtures() {
        group.bench_with_input(BenchmarkId::new("pkt", name), &pkt, |b, pkt| {
            b.iter(|| encode_packet(black_box(pkt)))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_packet");
    for (name, pkt) in fixtures() {
        let bytes = encode_packet(&pkt);
        group.bench_with_input(BenchmarkId::new("pkt", name), &bytes, |b, bytes| {
            b.iter(|| decode_packet(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Header decode plus typed payload decode, as a device handler does it.
fn bench_decode_message(c: &mut Criterion) {
    let bytes = encode_packet(&fixtures()[4].1);
    c.bench_function("decode_light_state_message", |b| {
        b.iter(|| {
            let pkt = decode_packet(black_box(&bytes)).unwrap();
            pkt.message().unwrap()
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_decode_message);
criterion_main!(benches);
