use std::ffi::CStr;

use bytes::{BufMut, BytesMut};

/// A mutable, growable byte string.
#[derive(Clone, Default)]
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    pub fn with_capacity(n: usize) -> Buffer {
        Buffer {
            data: BytesMut::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn reserve_for(&mut self, extra: usize) {
        let needed = self.data.len() + extra;
        if needed > self.data.capacity() {
            let target = needed.max(self.data.capacity() * 2).max(16);
            self.data.reserve(target - self.data.len());
        }
    }

    pub fn push_byte(&mut self, b: u8) {
        self.reserve_for(1);
        self.data.put_u8(b);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.reserve_for(bytes.len());
        self.data.put_slice(bytes);
    }

    /// Append the bytes of a C string, without its terminator.
    pub fn push_cstring(&mut self, s: &CStr) {
        self.push_bytes(s.to_bytes());
    }

    pub fn push_u16_le(&mut self, v: u16) {
        self.reserve_for(2);
        self.data.put_u16_le(v);
    }

    pub fn push_u32_le(&mut self, v: u32) {
        self.reserve_for(4);
        self.data.put_u32_le(v);
    }

    pub fn push_u64_le(&mut self, v: u64) {
        self.reserve_for(8);
        self.data.put_u64_le(v);
    }

    pub fn get(&self, idx: usize) -> Option<u8> {
        self.data.get(idx).copied()
    }

    /// Store a byte at `idx`, padding with zeros if the buffer is too short.
    pub fn set(&mut self, idx: usize, b: u8) {
        if idx >= self.data.len() {
            self.reserve_for(idx + 1 - self.data.len());
            self.data.resize(idx + 1, 0);
        }
        self.data[idx] = b;
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        let mut b = Buffer::with_capacity(bytes.len());
        b.push_bytes(bytes);
        b
    }
}
