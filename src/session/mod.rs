//! Session-side plumbing around per-speaker audio
//!
//! The network thread feeds every voice packet into a [`SpeakerRegistry`].
//! New speakers are created on their first packet and their mixer half is
//! handed to the mixer thread as a [`SpeakerEvent::Joined`].

pub mod channels;

pub use channels::{search_channels, Channel, ChannelMatch, ChannelSource};

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::config::PlayoutConfig;
use crate::error::Result;
use crate::protocol::Codec;
use crate::speaker::{SpeakerAudio, SpeakerId, SpeakerIngest, SpeakerOutput};

/// Notifications from the network side to the mixer
pub enum SpeakerEvent {
    /// A speaker started transmitting; the mixer owns its output from now on
    Joined(SpeakerOutput),
    /// A packet was queued for this speaker
    PacketReady(SpeakerId),
    /// The speaker is gone, or its codec changed and a new output follows
    Left(SpeakerId),
}

impl std::fmt::Debug for SpeakerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Joined(output) => f.debug_tuple("Joined").field(&output.speaker()).finish(),
            Self::PacketReady(speaker) => f.debug_tuple("PacketReady").field(speaker).finish(),
            Self::Left(speaker) => f.debug_tuple("Left").field(speaker).finish(),
        }
    }
}

/// Network-side registry of active speakers
pub struct SpeakerRegistry {
    config: PlayoutConfig,
    speakers: DashMap<SpeakerId, SpeakerIngest>,
    events: Sender<SpeakerEvent>,
    packets_received: AtomicU64,
    packets_dropped: AtomicU64,
}

impl SpeakerRegistry {
    /// Create a registry and the event stream the mixer listens on
    pub fn new(config: PlayoutConfig) -> Result<(Self, Receiver<SpeakerEvent>)> {
        config.validate()?;
        // Unbounded: the receive path must never block on the mixer
        let (events, rx) = unbounded();

        Ok((
            Self {
                config,
                speakers: DashMap::new(),
                events,
                packets_received: AtomicU64::new(0),
                packets_dropped: AtomicU64::new(0),
            },
            rx,
        ))
    }

    /// Route one voice payload to its speaker.
    ///
    /// Returns `Ok(false)` when the packet was malformed and dropped. Errors
    /// only come from creating the speaker's decoder or jitter buffer.
    pub fn receive(&self, speaker: SpeakerId, codec: Codec, payload: &[u8], sequence: u64) -> Result<bool> {
        self.packets_received.fetch_add(1, Ordering::Relaxed);

        // Clone out first; inserting while holding a map guard would deadlock
        let existing = self.speakers.get(&speaker).map(|entry| entry.clone());
        let ingest = match existing {
            Some(ingest) if ingest.codec() == codec => ingest,
            _ => self.join(speaker, codec)?,
        };

        match ingest.ingest(payload, sequence) {
            Ok(_) => {
                let _ = self.events.send(SpeakerEvent::PacketReady(speaker));
                Ok(true)
            }
            Err(e) => {
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(%speaker, sequence, error = %e, "Dropping malformed voice packet");
                Ok(false)
            }
        }
    }

    /// Like [`receive`](Self::receive), with the codec given as the Mumble
    /// UDP message type
    pub fn receive_udp(&self, speaker: SpeakerId, message_type: u8, payload: &[u8], sequence: u64) -> Result<bool> {
        match Codec::from_udp_type(message_type) {
            Some(codec) => self.receive(speaker, codec, payload, sequence),
            None => {
                self.packets_received.fetch_add(1, Ordering::Relaxed);
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(%speaker, message_type, "Ignoring non-voice UDP message");
                Ok(false)
            }
        }
    }

    /// Create-or-reuse under the entry lock, so concurrent first packets
    /// for one speaker build a single output
    fn join(&self, speaker: SpeakerId, codec: Codec) -> Result<SpeakerIngest> {
        match self.speakers.entry(speaker) {
            Entry::Occupied(mut entry) => {
                if entry.get().codec() == codec {
                    return Ok(entry.get().clone());
                }
                let (ingest, output) = SpeakerAudio::new(speaker, codec, &self.config)?.split();
                let previous = entry.insert(ingest.clone());
                info!(%speaker, from = ?previous.codec(), to = ?codec, "Speaker switched codec");
                let _ = self.events.send(SpeakerEvent::Left(speaker));
                let _ = self.events.send(SpeakerEvent::Joined(output));
                Ok(ingest)
            }
            Entry::Vacant(entry) => {
                let (ingest, output) = SpeakerAudio::new(speaker, codec, &self.config)?.split();
                entry.insert(ingest.clone());
                info!(%speaker, ?codec, "Speaker joined");
                let _ = self.events.send(SpeakerEvent::Joined(output));
                Ok(ingest)
            }
        }
    }

    /// Forget a speaker. Its output is released once the mixer drops it.
    pub fn remove(&self, speaker: SpeakerId) -> bool {
        let removed = self.speakers.remove(&speaker).is_some();
        if removed {
            info!(%speaker, "Speaker left");
            let _ = self.events.send(SpeakerEvent::Left(speaker));
        }
        removed
    }

    pub fn get(&self, speaker: SpeakerId) -> Option<SpeakerIngest> {
        self.speakers.get(&speaker).map(|entry| entry.clone())
    }

    pub fn contains(&self, speaker: SpeakerId) -> bool {
        self.speakers.contains_key(&speaker)
    }

    /// Active speaker ids in ascending order
    pub fn speakers(&self) -> Vec<SpeakerId> {
        let mut ids: Vec<_> = self.speakers.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    pub fn config(&self) -> &PlayoutConfig {
        &self.config
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }
}
