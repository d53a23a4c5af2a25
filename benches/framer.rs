//! Benchmarks for voice packet framing and the reorder buffer

use bytes::{BufMut, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use voice_playout::audio::{AudioDataPool, JitterPacket, JitterPrimitive, ReorderBuffer};
use voice_playout::protocol::{put_varint, Framing};

fn legacy_packet() -> Vec<u8> {
    // Four continued 40-byte subframes and a terminator
    let mut packet = vec![0x00];
    for tag in 0..4u8 {
        packet.push(0x80 | 40);
        packet.extend_from_slice(&[tag; 40]);
    }
    packet.push(0x00);
    packet
}

fn opus_packet() -> Vec<u8> {
    let mut packet = BytesMut::new();
    packet.put_u8(0x80);
    put_varint(&mut packet, 160);
    // TOC: CELT-only fullband 20 ms, one frame
    packet.put_u8(0xf8);
    packet.put_slice(&[0x55; 159]);
    packet.to_vec()
}

fn bench_legacy_parse(c: &mut Criterion) {
    let framing = Framing::Legacy { frame_size: 480 };
    let packet = legacy_packet();

    c.bench_function("legacy_parse", |b| {
        b.iter(|| framing.parse(black_box(&packet)).unwrap())
    });
}

fn bench_opus_parse(c: &mut Criterion) {
    let framing = Framing::Modern {
        frame_size: 480,
        sample_rate: 48000,
    };
    let packet = opus_packet();

    c.bench_function("opus_parse", |b| {
        b.iter(|| framing.parse(black_box(&packet)).unwrap())
    });
}

fn bench_reorder_window(c: &mut Criterion) {
    let pool = AudioDataPool::new(128, 64);
    let payload = opus_packet();

    c.bench_function("reorder_put_get_32", |b| {
        b.iter(|| {
            let mut buffer = ReorderBuffer::new(480, 64);
            buffer.set_margin(4800);
            for seq in (0..32u32).rev() {
                buffer.put(JitterPacket {
                    data: pool.copy_of(&payload),
                    span: 480,
                    timestamp: seq * 480,
                });
            }
            let mut scratch = pool.acquire();
            for _ in 0..32 {
                black_box(buffer.get(&mut scratch, 480));
                buffer.tick();
            }
        })
    });
}

criterion_group!(benches, bench_legacy_parse, bench_opus_parse, bench_reorder_window);
criterion_main!(benches);
