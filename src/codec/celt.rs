//! Safe wrappers around the CELT 0.7 mode and decoder.

use std::ffi::c_int;

use crate::codec::VoiceDecoder;
use crate::error::CodecError;

// ======================== FFI declarations ========================

/// Opaque type for CELTMode
#[repr(C)]
pub struct CELTMode {
    _private: [u8; 0],
}

/// Opaque type for CELTDecoder
#[repr(C)]
pub struct CELTDecoder {
    _private: [u8; 0],
}

const CELT_OK: c_int = 0;

#[link(name = "celt0")]
extern "C" {
    fn celt_mode_create(fs: i32, frame_size: c_int, error: *mut c_int) -> *mut CELTMode;
    fn celt_mode_destroy(mode: *mut CELTMode);
    fn celt_decoder_create(mode: *const CELTMode, channels: c_int, error: *mut c_int)
        -> *mut CELTDecoder;
    fn celt_decoder_destroy(st: *mut CELTDecoder);
    fn celt_decode_float(
        st: *mut CELTDecoder,
        data: *const u8,
        len: c_int,
        pcm: *mut f32,
    ) -> c_int;
}

// ======================== Decoder ========================

/// Mono CELT decoder with its mode.
///
/// The mode must outlive the decoder, so both live here and are destroyed
/// in that order.
pub struct CeltDecoder {
    mode: *mut CELTMode,
    decoder: *mut CELTDecoder,
    frame_size: usize,
}

// Used from the owning speaker's mixer thread only
unsafe impl Send for CeltDecoder {}

impl CeltDecoder {
    pub fn new(sample_rate: u32, frame_size: usize) -> Result<Self, CodecError> {
        let mut err: c_int = 0;
        let mode = unsafe { celt_mode_create(sample_rate as i32, frame_size as c_int, &mut err) };
        if mode.is_null() || err != CELT_OK {
            return Err(CodecError::DecoderInit(format!(
                "celt_mode_create failed: err={}",
                err
            )));
        }

        let decoder = unsafe { celt_decoder_create(mode, 1, &mut err) };
        if decoder.is_null() || err != CELT_OK {
            unsafe { celt_mode_destroy(mode) };
            return Err(CodecError::DecoderInit(format!(
                "celt_decoder_create failed: err={}",
                err
            )));
        }

        Ok(Self {
            mode,
            decoder,
            frame_size,
        })
    }
}

impl VoiceDecoder for CeltDecoder {
    fn decode(&mut self, data: Option<&[u8]>, output: &mut [f32]) -> Result<usize, CodecError> {
        if output.len() < self.frame_size {
            return Err(CodecError::OutputTooSmall {
                got: output.len(),
                need: self.frame_size,
            });
        }

        let (ptr, len) = match data {
            Some(data) => (data.as_ptr(), data.len() as c_int),
            None => (std::ptr::null(), 0),
        };

        let status = unsafe { celt_decode_float(self.decoder, ptr, len, output.as_mut_ptr()) };
        if status < 0 {
            return Err(CodecError::DecodingFailed(format!(
                "celt_decode_float returned {}",
                status
            )));
        }
        Ok(self.frame_size)
    }
}

impl Drop for CeltDecoder {
    fn drop(&mut self) {
        unsafe {
            celt_decoder_destroy(self.decoder);
            celt_mode_destroy(self.mode);
        }
    }
}
