//! Per-connection function table.
//!
//! Slot `i` holds the function with id `i` together with its cached call
//! buffers. The table only grows during a connection's lifetime.

use std::sync::Arc;

use bytes::BytesMut;

use super::registry::{flags, ServerFunction};
use crate::error::{RemoteError, Result};

/// Inputs larger than this are not kept between calls.
pub const INPUT_RELEASE_THRESHOLD: usize = 32 * 1024;

/// Outputs larger than this are not kept between calls.
pub const OUTPUT_RELEASE_THRESHOLD: usize = 128 * 1024;

/// Reusable payload buffers of one function.
#[derive(Debug, Default)]
pub struct CallBuffers {
    pub input: BytesMut,
    pub output: BytesMut,
}

impl CallBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop contents, keep capacity.
    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    /// Drop contents and capacity.
    pub fn release(&mut self) {
        self.input = BytesMut::new();
        self.output = BytesMut::new();
    }

    /// Post-call cleanup for a function with `function_flags`.
    ///
    /// Returns `true` if the buffers were released rather than cleared.
    pub fn reset_after_call(&mut self, function_flags: u8) -> bool {
        let release = flags::has_flag(function_flags, flags::CALLED_ONCE)
            || self.input.len() > INPUT_RELEASE_THRESHOLD
            || self.output.len() > OUTPUT_RELEASE_THRESHOLD;
        if release {
            self.release();
        } else {
            self.clear();
        }
        release
    }
}

/// A function and its buffers.
#[derive(Debug)]
pub struct FunctionSlot {
    function: Arc<ServerFunction>,
    buffers: CallBuffers,
}

impl FunctionSlot {
    #[inline]
    pub fn function(&self) -> &Arc<ServerFunction> {
        &self.function
    }

    /// Move the buffers out for the duration of a call.
    pub fn take_buffers(&mut self) -> CallBuffers {
        std::mem::take(&mut self.buffers)
    }

    /// Put the buffers back after a call.
    pub fn restore_buffers(&mut self, buffers: CallBuffers) {
        self.buffers = buffers;
    }
}

/// Dense id → function mapping for one connection.
#[derive(Debug, Default)]
pub struct FunctionTable {
    slots: Vec<FunctionSlot>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `function` and return its id.
    pub fn push(&mut self, function: Arc<ServerFunction>) -> Result<i16> {
        let id = i16::try_from(self.slots.len()).map_err(|_| RemoteError::TableFull)?;
        self.slots.push(FunctionSlot {
            function,
            buffers: CallBuffers::new(),
        });
        Ok(id)
    }

    pub fn get(&self, id: i16) -> Option<&FunctionSlot> {
        usize::try_from(id).ok().and_then(|i| self.slots.get(i))
    }

    pub fn get_mut(&mut self, id: i16) -> Option<&mut FunctionSlot> {
        usize::try_from(id).ok().and_then(|i| self.slots.get_mut(i))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
