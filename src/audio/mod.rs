//! Audio buffering: payload pool, jitter primitives and the PCM accumulator

pub mod buffer;
pub mod jitter;
pub mod pool;
#[cfg(feature = "speexdsp")]
pub mod speex;

pub use buffer::PcmBuffer;
pub use jitter::{create_primitive, GetStatus, JitterPacket, JitterPrimitive, JitterStats, ReorderBuffer};
pub use pool::{AudioDataPool, PoolStats, PooledBuffer};
#[cfg(feature = "speexdsp")]
pub use speex::SpeexJitterBuffer;
