use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::dns::WireError;

/// Fixed size of every pooled packet buffer.
pub const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    Reading,
    Writing,
}

/// A reusable packet buffer with a cursor and a name-compression table.
///
/// The same buffer type backs both directions: `load` fills it for parsing,
/// `reset` prepares it for writing. The compression table maps a lowercased
/// name suffix to the offset it was first written at.
pub struct PacketBuffer {
    data: Vec<u8>,
    len: usize,
    pos: usize,
    mode: BufferMode,
    compression: FxHashMap<String, u16>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; BUFFER_SIZE],
            len: 0,
            pos: 0,
            mode: BufferMode::Writing,
            compression: FxHashMap::default(),
        }
    }

    /// Clear cursor, length and the compression table. Capacity is fixed.
    pub fn reset(&mut self) {
        self.len = 0;
        self.pos = 0;
        self.mode = BufferMode::Writing;
        self.compression.clear();
    }

    /// Fill the buffer with a received datagram and switch to parse mode.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if bytes.len() > BUFFER_SIZE {
            return Err(WireError::BufferFull);
        }
        self.reset();
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        self.mode = BufferMode::Reading;
        Ok(())
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), WireError> {
        if pos > self.len {
            return Err(WireError::Truncated);
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.pos)
    }

    /// The filled portion of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn byte_at(&self, pos: usize) -> Result<u8, WireError> {
        if pos >= self.len {
            return Err(WireError::Truncated);
        }
        Ok(self.data[pos])
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let byte = self.byte_at(self.pos)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8], WireError> {
        if self.remaining() < count {
            return Err(WireError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), WireError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if self.pos + bytes.len() > BUFFER_SIZE {
            return Err(WireError::BufferFull);
        }
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        if self.pos > self.len {
            self.len = self.pos;
        }
        Ok(())
    }

    /// Overwrite two bytes at an earlier offset, used to patch length
    /// prefixes and section counts after the fact.
    pub fn patch_u16(&mut self, at: usize, value: u16) -> Result<(), WireError> {
        if at + 2 > self.len {
            return Err(WireError::Truncated);
        }
        self.data[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn compression_offset(&self, suffix: &str) -> Option<u16> {
        self.compression.get(suffix).copied()
    }

    pub fn remember_suffix(&mut self, suffix: String, offset: u16) {
        self.compression.entry(suffix).or_insert(offset);
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Free-list pool of packet buffers. `get` is O(1); buffers return to the
/// pool when the guard drops and are reset on the way back in.
pub struct BufferPool {
    free: Arc<Mutex<Vec<PacketBuffer>>>,
    max_buffers: usize,
}

impl BufferPool {
    pub fn new(max_buffers: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::with_capacity(max_buffers))),
            max_buffers,
        }
    }

    pub fn get(&self) -> PooledBuffer {
        let buffer = {
            let mut free = self.free.lock();
            free.pop()
        };

        PooledBuffer {
            buffer: Some(buffer.unwrap_or_default()),
            pool: self.clone(),
        }
    }

    fn put(&self, mut buffer: PacketBuffer) {
        buffer.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_buffers {
            free.push(buffer);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            free: Arc::clone(&self.free),
            max_buffers: self.max_buffers,
        }
    }
}

/// RAII guard returning the buffer to its pool on every exit path.
pub struct PooledBuffer {
    buffer: Option<PacketBuffer>,
    pool: BufferPool,
}

impl std::ops::Deref for PooledBuffer {
    type Target = PacketBuffer;

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref().unwrap()
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.as_mut().unwrap()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.put(buffer);
        }
    }
}
