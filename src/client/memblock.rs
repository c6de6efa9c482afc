//! Reference-counted audio memory blocks and shared usage accounting.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

#[derive(Default)]
struct StatInner {
    /// Blocks currently alive.
    allocated: Cell<u32>,
    /// Bytes currently alive.
    allocated_size: Cell<usize>,
    /// Blocks ever created.
    accumulated: Cell<u64>,
    /// Bytes ever created.
    accumulated_size: Cell<u64>,
}

/// Shared memory-block usage counter.
///
/// Cloned into the transport and every stream; the counter stays alive as
/// long as any block it accounts for does, so it may outlive the context
/// that created it.
#[derive(Clone, Default)]
pub struct MemblockStat {
    inner: Rc<StatInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemblockStatSnapshot {
    pub allocated: u32,
    pub allocated_size: usize,
    pub accumulated: u64,
    pub accumulated_size: u64,
}

impl MemblockStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MemblockStatSnapshot {
        MemblockStatSnapshot {
            allocated: self.inner.allocated.get(),
            allocated_size: self.inner.allocated_size.get(),
            accumulated: self.inner.accumulated.get(),
            accumulated_size: self.inner.accumulated_size.get(),
        }
    }

    fn add(&self, len: usize) {
        self.inner.allocated.set(self.inner.allocated.get() + 1);
        self.inner
            .allocated_size
            .set(self.inner.allocated_size.get() + len);
        self.inner.accumulated.set(self.inner.accumulated.get() + 1);
        self.inner
            .accumulated_size
            .set(self.inner.accumulated_size.get() + len as u64);
    }

    fn remove(&self, len: usize) {
        self.inner
            .allocated
            .set(self.inner.allocated.get().saturating_sub(1));
        self.inner
            .allocated_size
            .set(self.inner.allocated_size.get().saturating_sub(len));
    }
}

impl fmt::Debug for MemblockStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemblockStat")
            .field("allocated", &self.inner.allocated.get())
            .field("allocated_size", &self.inner.allocated_size.get())
            .finish()
    }
}

/// One accounted block of audio memory.
pub struct Memblock {
    data: Bytes,
    stat: MemblockStat,
}

impl Memblock {
    pub fn new(data: Bytes, stat: &MemblockStat) -> Self {
        stat.add(data.len());
        Self {
            data,
            stat: stat.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Memblock {
    fn drop(&mut self) {
        self.stat.remove(self.data.len());
    }
}

impl fmt::Debug for Memblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memblock").field("len", &self.len()).finish()
    }
}

/// A view into a [`Memblock`]: base block plus offset and length.
///
/// The referenced bytes are only valid while the chunk (and through it the
/// block) is alive; consumers must copy before returning if they need the
/// data later.
#[derive(Debug, Clone)]
pub struct Memchunk {
    pub memblock: Rc<Memblock>,
    pub index: usize,
    pub length: usize,
}

impl Memchunk {
    pub fn from_block(memblock: Memblock) -> Self {
        let length = memblock.len();
        Self {
            memblock: Rc::new(memblock),
            index: 0,
            length,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.memblock.data()[self.index..self.index + self.length]
    }
}
