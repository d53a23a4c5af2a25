//! Safe wrapper around the speexdsp jitter buffer.

use std::ffi::{c_char, c_int, c_void};

use crate::audio::jitter::{GetStatus, JitterPacket, JitterPrimitive};
use crate::audio::pool::PooledBuffer;
use crate::error::JitterError;

// ======================== FFI declarations ========================

/// Opaque type for JitterBuffer
#[repr(C)]
pub struct JitterBuffer {
    _private: [u8; 0],
}

#[repr(C)]
struct JitterBufferPacket {
    data: *mut c_char,
    len: u32,
    timestamp: u32,
    span: u32,
    sequence: u16,
    user_data: u32,
}

const JITTER_BUFFER_OK: c_int = 0;
const JITTER_BUFFER_INSERTION: c_int = 2;

const JITTER_BUFFER_SET_MARGIN: c_int = 0;
const JITTER_BUFFER_GET_AVAILABLE_COUNT: c_int = 3;

/// Scratch size handed to `jitter_buffer_get`
const SCRATCH_SIZE: usize = 4096;

#[link(name = "speexdsp")]
extern "C" {
    fn jitter_buffer_init(step_size: c_int) -> *mut JitterBuffer;
    fn jitter_buffer_destroy(jitter: *mut JitterBuffer);
    fn jitter_buffer_put(jitter: *mut JitterBuffer, packet: *const JitterBufferPacket);
    fn jitter_buffer_get(
        jitter: *mut JitterBuffer,
        packet: *mut JitterBufferPacket,
        desired_span: i32,
        start_offset: *mut i32,
    ) -> c_int;
    fn jitter_buffer_update_delay(
        jitter: *mut JitterBuffer,
        packet: *mut JitterBufferPacket,
        start_offset: *mut i32,
    ) -> c_int;
    fn jitter_buffer_get_pointer_timestamp(jitter: *mut JitterBuffer) -> c_int;
    fn jitter_buffer_tick(jitter: *mut JitterBuffer);
    fn jitter_buffer_ctl(jitter: *mut JitterBuffer, request: c_int, ptr: *mut c_void) -> c_int;
}

// ======================== Jitter buffer ========================

/// speexdsp jitter buffer behind the [`JitterPrimitive`] surface
pub struct SpeexJitterBuffer {
    state: *mut JitterBuffer,
}

// The handle is only touched under the owning speaker's lock
unsafe impl Send for SpeexJitterBuffer {}

impl SpeexJitterBuffer {
    /// Create a jitter buffer ticking `frame_size` samples at a time
    pub fn new(frame_size: u32) -> Result<Self, JitterError> {
        let state = unsafe { jitter_buffer_init(frame_size as c_int) };
        if state.is_null() {
            return Err(JitterError::InitFailed);
        }
        Ok(Self { state })
    }

    fn ctl(&self, request: c_int, value: &mut c_int) {
        unsafe {
            jitter_buffer_ctl(self.state, request, value as *mut c_int as *mut c_void);
        }
    }
}

impl JitterPrimitive for SpeexJitterBuffer {
    fn put(&mut self, packet: JitterPacket) {
        let raw = JitterBufferPacket {
            // speexdsp copies the bytes; the pointer is never written through
            data: packet.data.as_ptr() as *mut c_char,
            len: packet.data.len() as u32,
            timestamp: packet.timestamp,
            span: packet.span,
            sequence: 0,
            user_data: 0,
        };
        unsafe {
            jitter_buffer_put(self.state, &raw);
        }
    }

    fn get(&mut self, scratch: &mut PooledBuffer, desired_span: u32) -> GetStatus {
        scratch.resize(SCRATCH_SIZE);
        let mut raw = JitterBufferPacket {
            data: scratch.as_mut_ptr() as *mut c_char,
            len: SCRATCH_SIZE as u32,
            timestamp: 0,
            span: 0,
            sequence: 0,
            user_data: 0,
        };
        let mut start_offset: i32 = 0;

        let status = unsafe {
            jitter_buffer_get(self.state, &mut raw, desired_span as i32, &mut start_offset)
        };

        match status {
            JITTER_BUFFER_OK => {
                scratch.truncate(raw.len as usize);
                GetStatus::Ok {
                    timestamp: raw.timestamp,
                    span: raw.span,
                    start_offset,
                }
            }
            JITTER_BUFFER_INSERTION => {
                scratch.truncate(0);
                GetStatus::Insertion
            }
            _ => {
                scratch.truncate(0);
                GetStatus::Missing
            }
        }
    }

    fn update_delay(&mut self) {
        let mut raw = JitterBufferPacket {
            data: std::ptr::null_mut(),
            len: 0,
            timestamp: 0,
            span: 0,
            sequence: 0,
            user_data: 0,
        };
        let mut start_offset: i32 = 0;
        unsafe {
            jitter_buffer_update_delay(self.state, &mut raw, &mut start_offset);
        }
    }

    fn tick(&mut self) {
        unsafe {
            jitter_buffer_tick(self.state);
        }
    }

    fn set_margin(&mut self, margin: u32) {
        let mut value = margin as c_int;
        self.ctl(JITTER_BUFFER_SET_MARGIN, &mut value);
    }

    fn available_count(&self) -> u32 {
        let mut value: c_int = 0;
        self.ctl(JITTER_BUFFER_GET_AVAILABLE_COUNT, &mut value);
        value.max(0) as u32
    }

    fn pointer_timestamp(&self) -> u32 {
        unsafe { jitter_buffer_get_pointer_timestamp(self.state) as u32 }
    }
}

impl Drop for SpeexJitterBuffer {
    fn drop(&mut self) {
        unsafe {
            jitter_buffer_destroy(self.state);
        }
    }
}
