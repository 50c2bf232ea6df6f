//! Compile-time register bookkeeping for one function.
//!
//! Registers are tracked in a bit set split into 32-bit chunks. The
//! allocator also records the highest register ever handed out, which
//! becomes the frame size of the function: the VM sizes every activation to
//! `max + 1` registers up front.

use vec1::{vec1, Vec1};

const CHUNK_BITS: u32 = 32;

/// First register of the scratch bank.
pub const TEMP_BASE: u32 = 0xF0;
/// Number of registers in the scratch bank.
pub const TEMP_COUNT: u32 = 8;
/// Highest register an 8-bit slot operand can name.
pub const MAX_NEAR_REG: u32 = 0xFF;

/// A scratch register identifier, `0..TEMP_COUNT`.
pub type TempSlot = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAllocator {
    chunks: Vec1<u32>,
    max: Option<u32>,
    /// Bit `n` is set while scratch register `n` is handed out.
    temps: u32,
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAllocator {
    /// Create an empty allocator. The scratch bank `0xF0..0xF8` is reserved
    /// up front so ordinary allocations never land on it.
    pub fn new() -> Self {
        let mut ra = RegisterAllocator {
            chunks: vec1![0],
            max: None,
            temps: 0,
        };
        for reg in TEMP_BASE..TEMP_BASE + TEMP_COUNT {
            ra.set_bit(reg);
        }
        ra
    }

    /// The highest register ever allocated, if any.
    pub fn max(&self) -> Option<u32> {
        self.max
    }

    /// Number of registers an activation of this function needs.
    pub fn frame_size(&self) -> u32 {
        self.max.map_or(0, |m| m + 1)
    }

    pub fn is_used(&self, reg: u32) -> bool {
        let (chunk, bit) = split(reg);
        self.chunks
            .get(chunk)
            .map_or(false, |c| c & (1 << bit) != 0)
    }

    fn set_bit(&mut self, reg: u32) {
        let (chunk, bit) = split(reg);
        while self.chunks.len() <= chunk {
            self.chunks.push(0);
        }
        self.chunks[chunk] |= 1 << bit;
    }

    fn clear_bit(&mut self, reg: u32) {
        let (chunk, bit) = split(reg);
        if let Some(c) = self.chunks.get_mut(chunk) {
            *c &= !(1 << bit);
        }
    }

    fn bump_max(&mut self, reg: u32) {
        if self.max.map_or(true, |m| reg > m) {
            self.max = Some(reg);
        }
    }

    /// Allocate the lowest free register.
    pub fn alloc_one(&mut self) -> u32 {
        let reg = self
            .chunks
            .iter()
            .enumerate()
            .find(|(_, c)| **c != u32::MAX)
            .map(|(idx, c)| idx as u32 * CHUNK_BITS + c.trailing_ones())
            .unwrap_or(self.chunks.len() as u32 * CHUNK_BITS);
        self.touch(reg);
        reg
    }

    /// Allocate `n` contiguous registers and return the first one. With
    /// `n == 0` this returns the lowest free register without reserving it.
    pub fn alloc_n(&mut self, n: u32) -> u32 {
        let mut start = 0;
        'search: loop {
            for reg in start..start + n {
                if self.is_used(reg) {
                    start = reg + 1;
                    continue 'search;
                }
            }
            if n == 0 && self.is_used(start) {
                start += 1;
                continue;
            }
            break;
        }
        for reg in start..start + n {
            self.touch(reg);
        }
        start
    }

    /// Reserve the registers a call with `nargs` arguments needs.
    ///
    /// If the `nargs` registers right above `callee` are free they are
    /// reserved in place and `callee` is returned. Otherwise a fresh block of
    /// `nargs + 1` registers is allocated and its first register returned;
    /// the caller then moves the callee and its arguments into that block.
    pub fn alloc_call(&mut self, callee: u32, nargs: u32) -> u32 {
        let fits = (callee + 1..=callee + nargs).all(|reg| !self.is_used(reg));
        if fits {
            for reg in callee..=callee + nargs {
                self.touch(reg);
            }
            callee
        } else {
            self.alloc_n(nargs + 1)
        }
    }

    /// Mark a specific register as used, e.g. a parameter.
    pub fn touch(&mut self, reg: u32) {
        self.set_bit(reg);
        self.bump_max(reg);
    }

    pub fn free_one(&mut self, reg: u32) {
        debug_assert!(self.is_used(reg), "freeing free register r{}", reg);
        debug_assert!(
            !(TEMP_BASE..TEMP_BASE + TEMP_COUNT).contains(&reg),
            "scratch register r{} freed with free_one",
            reg
        );
        self.clear_bit(reg);
    }

    pub fn free_range(&mut self, start: u32, n: u32) {
        for reg in start..start + n {
            self.free_one(reg);
        }
    }

    /// Allocate a register for a short-lived intermediate.
    ///
    /// This is an ordinary register while one is available below
    /// [`MAX_NEAR_REG`], so it can be named by any slot operand. Once the low
    /// window is exhausted the scratch register `TEMP_BASE + nth` is used
    /// instead. Release it with [`free_temp`](Self::free_temp).
    pub fn alloc_temp(&mut self, nth: TempSlot) -> u32 {
        debug_assert!(nth < TEMP_COUNT, "no scratch register {}", nth);
        debug_assert!(self.temps & (1 << nth) == 0, "scratch {} in use", nth);
        self.temps |= 1 << nth;

        let old_max = self.max;
        let reg = self.alloc_one();
        if reg <= MAX_NEAR_REG {
            return reg;
        }

        self.clear_bit(reg);
        self.max = old_max;
        let reg = TEMP_BASE + nth;
        self.bump_max(reg);
        reg
    }

    pub fn free_temp(&mut self, reg: u32, nth: TempSlot) {
        self.temps &= !(1 << nth);
        if !(TEMP_BASE..TEMP_BASE + TEMP_COUNT).contains(&reg) {
            self.free_one(reg);
        }
    }

    /// Start compiling an alternative branch from the current state.
    pub fn branch(&self) -> RegisterAllocator {
        self.clone()
    }

    /// Join a branch back into this allocator. Only the high-water mark is
    /// taken from the branch; the set of live registers stays as it was
    /// before branching.
    pub fn merge(&mut self, branch: &RegisterAllocator) {
        if let Some(m) = branch.max {
            self.bump_max(m);
        }
    }
}

fn split(reg: u32) -> (usize, u32) {
    ((reg / CHUNK_BITS) as usize, reg % CHUNK_BITS)
}
