//! Voice Playout Simulator
//!
//! Encodes sine tones as Opus voice packets, delivers them from network
//! threads with reordering and loss, and pulls mixed audio on a 10 ms
//! mixer clock the way a playback callback would.
//!
//! Usage: `playout-sim [config.toml]`

use anyhow::{anyhow, Context, Result};
use bytes::{BufMut, BytesMut};
use opus::{Application, Channels, Encoder};
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_playout::{
    constants::MAX_PACKET_SIZE, protocol::put_varint, Codec, PlayoutConfig, SpeakerEvent, SpeakerId,
    SpeakerOutput, SpeakerRegistry,
};

/// Samples per encoded packet (20 ms)
const PACKET_SAMPLES: usize = 960;

/// Packets per talk spurt
const PACKETS_PER_SPURT: usize = 150;

/// Terminator bit of the Opus length header
const TERMINATOR: u64 = 0x2000;

/// Upper bound on mixer ticks so a stuck speaker cannot hang the run
const MAX_TICKS: usize = 3000;

/// Mixer ticks to keep running after the last packet was delivered
const DRAIN_TICKS: usize = 100;

struct Talker {
    speaker: SpeakerId,
    frequency: f32,
    start_delay: Duration,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voice playout simulator");

    let config = match std::env::args().nth(1) {
        Some(path) => PlayoutConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => PlayoutConfig::default(),
    };
    tracing::info!(
        sample_rate = config.sample_rate,
        frame_size = config.frame_size,
        margin_frames = config.jitter_margin_frames,
        backend = ?config.jitter_backend,
        "Playout configuration"
    );

    let (registry, events) = SpeakerRegistry::new(config.clone())?;
    let registry = Arc::new(registry);

    let talkers = [
        Talker {
            speaker: SpeakerId(1),
            frequency: 440.0,
            start_delay: Duration::ZERO,
        },
        Talker {
            speaker: SpeakerId(2),
            frequency: 660.0,
            start_delay: Duration::from_millis(700),
        },
    ];

    let mut network: Vec<JoinHandle<Result<()>>> = Vec::new();
    for talker in talkers {
        let packets = encode_talk_spurt(talker.frequency, config.sample_rate)?;
        let registry = Arc::clone(&registry);
        network.push(thread::spawn(move || deliver(&registry, &talker, &packets)));
    }

    let frame_size = config.frame_size;
    let tick = Duration::from_micros(frame_size as u64 * 1_000_000 / u64::from(config.sample_rate));
    let mut outputs: HashMap<SpeakerId, SpeakerOutput> = HashMap::new();
    let mut mix = vec![0.0f32; frame_size];
    let mut next_tick = Instant::now();
    let mut last_stats = Instant::now();
    let mut drain_left = DRAIN_TICKS;

    for ticks in 0..MAX_TICKS {
        for event in events.try_iter() {
            match event {
                SpeakerEvent::Joined(output) => {
                    tracing::info!("Mixer picked up speaker {}", output.speaker());
                    outputs.insert(output.speaker(), output);
                }
                SpeakerEvent::PacketReady(_) => {}
                SpeakerEvent::Left(speaker) => {
                    if let Some(output) = outputs.remove(&speaker) {
                        log_stats(&output);
                    }
                }
            }
        }

        mix.fill(0.0);
        let mut talking = 0;
        for output in outputs.values_mut() {
            if output.pull(frame_size)? {
                talking += 1;
                for (mixed, sample) in mix.iter_mut().zip(output.samples()) {
                    *mixed += sample;
                }
            }
        }
        let rms = (mix.iter().map(|s| s * s).sum::<f32>() / frame_size as f32).sqrt();
        tracing::trace!(ticks, talking, rms, "Mixed frame");

        if last_stats.elapsed() >= Duration::from_secs(1) {
            last_stats = Instant::now();
            tracing::info!(
                "Mixer: {} speakers, {} talking, level {:.3}",
                outputs.len(),
                talking,
                rms
            );
            for output in outputs.values() {
                log_stats(output);
            }
        }

        if network.iter().all(|handle| handle.is_finished()) {
            if drain_left == 0 {
                tracing::info!(ticks, "Playout drained");
                break;
            }
            drain_left -= 1;
        }

        next_tick += tick;
        if let Some(wait) = next_tick.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    for handle in network {
        handle
            .join()
            .map_err(|_| anyhow!("network thread panicked"))??;
    }

    for speaker in registry.speakers() {
        registry.remove(speaker);
    }
    for event in events.try_iter() {
        if let SpeakerEvent::Left(speaker) = event {
            if let Some(output) = outputs.remove(&speaker) {
                log_stats(&output);
            }
        }
    }

    tracing::info!(
        "Done: {} packets received, {} dropped",
        registry.packets_received(),
        registry.packets_dropped()
    );
    Ok(())
}

/// Encode one talk spurt of a sine tone as Mumble Opus voice payloads
fn encode_talk_spurt(frequency: f32, sample_rate: u32) -> Result<Vec<Vec<u8>>> {
    let mut encoder =
        Encoder::new(sample_rate, Channels::Mono, Application::Voip).context("creating Opus encoder")?;
    let step = TAU * frequency / sample_rate as f32;
    let mut phase = 0.0f32;
    let mut pcm = vec![0.0f32; PACKET_SAMPLES];
    let mut body = vec![0u8; MAX_PACKET_SIZE];
    let mut packets = Vec::with_capacity(PACKETS_PER_SPURT);

    for index in 0..PACKETS_PER_SPURT {
        for sample in pcm.iter_mut() {
            *sample = phase.sin() * 0.3;
            phase = (phase + step) % TAU;
        }
        let len = encoder.encode_float(&pcm, &mut body)?;

        let mut header = len as u64;
        if index + 1 == PACKETS_PER_SPURT {
            header |= TERMINATOR;
        }

        let mut packet = BytesMut::with_capacity(len + 3);
        packet.put_u8(Codec::Opus.udp_type() << 5);
        put_varint(&mut packet, header);
        packet.put_slice(&body[..len]);
        packets.push(packet.to_vec());
    }

    Ok(packets)
}

/// Packet indices in arrival order: some adjacent pairs swapped, a few lost
fn arrival_order(count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..count).filter(|index| index % 23 != 11).collect();
    for pair in order.chunks_mut(2).step_by(4) {
        pair.reverse();
    }
    order
}

fn deliver(registry: &SpeakerRegistry, talker: &Talker, packets: &[Vec<u8>]) -> Result<()> {
    thread::sleep(talker.start_delay);
    let interval = Duration::from_millis(20);
    let frames_per_packet = (PACKET_SAMPLES / registry.config().frame_size) as u64;

    for index in arrival_order(packets.len()) {
        let sequence = index as u64 * frames_per_packet;
        registry.receive(talker.speaker, Codec::Opus, &packets[index], sequence)?;
        thread::sleep(interval);
    }

    tracing::info!("Speaker {} finished talking", talker.speaker);
    Ok(())
}

fn log_stats(output: &SpeakerOutput) {
    let stats = output.stats();
    match stats.jitter {
        Some(jitter) => tracing::info!(
            "Speaker {}: {} packets, {} decoded, {} concealed, {} silent, jitter {}/{} ({:.1}% loss)",
            output.speaker(),
            stats.packets_ingested,
            stats.frames_decoded,
            stats.frames_concealed,
            stats.silence_frames,
            jitter.level,
            jitter.capacity,
            jitter.loss_rate() * 100.0
        ),
        None => tracing::info!(
            "Speaker {}: {} packets, {} decoded, {} concealed, {} silent",
            output.speaker(),
            stats.packets_ingested,
            stats.frames_decoded,
            stats.frames_concealed,
            stats.silence_frames
        ),
    }
}
