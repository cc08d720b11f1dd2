//! Pooled queue items for in-flight and completed operations.
//!
//! Every pending or completed asynchronous operation is one [`QueueItem`],
//! allocated from an [`ItemPool`]: a generation-checked slot arena whose
//! boxed slots are recycled through a free list, so the hot path performs
//! no per-operation heap allocation after warm-up.
//!
//! # Keys
//!
//! Items are addressed by [`ItemKey`], an `{index, generation}` pair. The
//! generation counter makes stale keys harmless (ABA safety): a key packed
//! into an AIO `sigevent` and handed back by the kernel after the item was
//! cancelled simply fails the generation check.
//!
//! # Address stability
//!
//! Items are stored as `Box<QueueItem>` so the embedded `aiocb` keeps a
//! stable address while the kernel owns an outstanding file operation, even
//! if the arena's slot vector reallocates.

// The only unsafe here is the Send assertion for the embedded aiocb and the
// zeroed aiocb constructor; see the safety comments at each site.
#![allow(unsafe_code)]

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::port::Overlapped;

/// Hard ceiling on concurrently live items, far above any sane workload.
/// Hitting it reports resource exhaustion instead of growing without bound.
const MAX_ITEMS: usize = 1 << 20;

/// The kind of asynchronous operation an item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Outbound TCP connection establishment.
    Connect,
    /// Inbound TCP connection acceptance.
    Accept,
    /// Socket receive (TCP or UDP).
    Recv,
    /// Socket send (TCP or UDP).
    Send,
    /// File read through POSIX AIO.
    Read,
    /// File write through POSIX AIO.
    Write,
    /// Synthetic completion injected by `post_queued_completion_status`.
    UserData,
}

impl OpKind {
    /// Returns a short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Accept => "accept",
            Self::Recv => "recv",
            Self::Send => "send",
            Self::Read => "read",
            Self::Write => "write",
            Self::UserData => "userdata",
        }
    }

    /// True for operations completed by read readiness.
    #[must_use]
    pub const fn wants_read(&self) -> bool {
        matches!(self, Self::Accept | Self::Recv)
    }

    /// True for operations completed by write readiness.
    #[must_use]
    pub const fn wants_write(&self) -> bool {
        matches!(self, Self::Connect | Self::Send)
    }

    /// True for file operations carried by POSIX AIO.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }
}

/// A pool key with a generation counter for ABA safety.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    index: u32,
    generation: u32,
}

impl ItemKey {
    /// Returns the raw slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation counter.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the key into 64 bits for transport through a `sigevent`.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        (self.generation as u64) << 32 | self.index as u64
    }

    /// Unpacks a key previously produced by [`to_bits`](Self::to_bits).
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl std::fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ItemKey({}:{})", self.index, self.generation)
    }
}

/// One in-flight or completed asynchronous operation.
///
/// Lives in exactly one of {its descriptor's initial queue, its port's
/// completion queue, the doomed list} at any instant; moves happen under
/// the registry lock.
#[derive(Debug)]
pub struct QueueItem {
    /// Owning descriptor, `-1` for posted user-data completions.
    pub fd: RawFd,
    /// What this item is doing.
    pub kind: OpKind,
    /// Completion key of the owning association (opaque caller tag).
    pub key: usize,
    /// Caller context returned on completion.
    pub overlapped: Arc<Overlapped>,
    /// Operation buffer; receives fill it, sends drain it.
    pub buffer: Vec<u8>,
    /// Peer address: input for datagram sends, output for datagram receives.
    pub peer: Option<SocketAddr>,
    /// Descriptor produced by a completed accept.
    pub accepted: Option<RawFd>,
    /// Bytes actually transferred.
    pub bytes: usize,
    /// OS error code for the completion; 0 = success.
    pub os_error: i32,
    /// AIO control block for file operations; the kernel reads and writes
    /// through its address while the operation is in flight.
    pub aiocb: libc::aiocb,
}

// SAFETY: the raw pointers inside `aiocb` (`aio_buf`, sigevent payload)
// point only into `self.buffer` and at pool-key bits, both owned by this
// item; the item is never dropped while the kernel holds the control block
// (cancellation parks it on the doomed list until `aio_error` settles).
unsafe impl Send for QueueItem {}

impl QueueItem {
    /// Creates an item with empty result fields and a zeroed control block.
    #[must_use]
    pub fn new(kind: OpKind, fd: RawFd, key: usize, overlapped: Arc<Overlapped>) -> Self {
        Self {
            fd,
            kind,
            key,
            overlapped,
            buffer: Vec::new(),
            peer: None,
            accepted: None,
            bytes: 0,
            os_error: 0,
            // SAFETY: aiocb is a plain-old-data C struct; all-zero is the
            // documented "no request" state and is overwritten before use.
            aiocb: unsafe { std::mem::zeroed() },
        }
    }
}

/// A slot in the pool: occupied by a boxed item or vacant.
#[derive(Debug)]
enum Slot {
    Occupied { item: Box<QueueItem>, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Generation-checked slot arena of boxed queue items.
///
/// Vacated slots go on a free list and their boxes are retained in a spare
/// list, so steady-state insert/remove cycles touch no allocator.
#[derive(Debug, Default)]
pub struct ItemPool {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    spares: Vec<Box<QueueItem>>,
    len: usize,
}

impl ItemPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool with pre-sized slot storage.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            spares: Vec::with_capacity(capacity),
            len: 0,
        }
    }

    /// Returns the number of live items.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no items are live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts an item, returning its key, or `None` at the ceiling.
    pub fn insert(&mut self, item: QueueItem) -> Option<ItemKey> {
        if self.len >= MAX_ITEMS {
            return None;
        }
        let boxed = match self.spares.pop() {
            Some(mut spare) => {
                *spare = item;
                spare
            }
            None => Box::new(item),
        };
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (next_free, generation) = match slot {
                Slot::Vacant {
                    next_free,
                    generation,
                } => (*next_free, *generation),
                Slot::Occupied { .. } => {
                    // Free list invariant broken; unreachable by construction.
                    debug_assert!(false, "free head points at occupied slot");
                    return None;
                }
            };
            self.free_head = next_free;
            *slot = Slot::Occupied {
                item: boxed,
                generation,
            };
            self.len += 1;
            Some(ItemKey { index, generation })
        } else {
            let index = u32::try_from(self.slots.len()).ok()?;
            self.slots.push(Slot::Occupied {
                item: boxed,
                generation: 0,
            });
            self.len += 1;
            Some(ItemKey {
                index,
                generation: 0,
            })
        }
    }

    /// Returns a shared reference to the item for `key`, if still live.
    #[must_use]
    pub fn get(&self, key: ItemKey) -> Option<&QueueItem> {
        match self.slots.get(key.index as usize) {
            Some(Slot::Occupied { item, generation }) if *generation == key.generation => {
                Some(item)
            }
            _ => None,
        }
    }

    /// Returns a mutable reference to the item for `key`, if still live.
    pub fn get_mut(&mut self, key: ItemKey) -> Option<&mut QueueItem> {
        match self.slots.get_mut(key.index as usize) {
            Some(Slot::Occupied { item, generation }) if *generation == key.generation => {
                Some(item)
            }
            _ => None,
        }
    }

    /// Removes the item for `key`, bumping the slot generation.
    ///
    /// Hand the box back through [`recycle`](Self::recycle) once its
    /// contents have been consumed, so the allocation is reused.
    pub fn remove(&mut self, key: ItemKey) -> Option<Box<QueueItem>> {
        let slot = self.slots.get_mut(key.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {
                let generation = generation.wrapping_add(1);
                let Slot::Occupied { item, .. } = std::mem::replace(
                    slot,
                    Slot::Vacant {
                        next_free: self.free_head,
                        generation,
                    },
                ) else {
                    unreachable!("matched occupied above");
                };
                self.free_head = Some(key.index);
                self.len -= 1;
                Some(item)
            }
            _ => None,
        }
    }

    /// Returns a consumed box to the spare list for reuse.
    pub fn recycle(&mut self, boxed: Box<QueueItem>) {
        if self.spares.len() < self.spares.capacity().max(64) {
            self.spares.push(boxed);
        }
    }

    /// Bulk-frees every slot and spare. Used when the last port closes.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.spares.clear();
        self.free_head = None;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: OpKind, fd: RawFd) -> QueueItem {
        QueueItem::new(kind, fd, 7, Overlapped::new())
    }

    #[test]
    fn insert_get_remove() {
        let mut pool = ItemPool::new();
        let key = pool.insert(item(OpKind::Recv, 3)).expect("insert");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(key).map(|i| i.fd), Some(3));
        let removed = pool.remove(key).expect("remove");
        assert_eq!(removed.kind, OpKind::Recv);
        assert!(pool.is_empty());
        assert!(pool.get(key).is_none());
    }

    #[test]
    fn stale_key_fails_generation_check() {
        let mut pool = ItemPool::new();
        let key = pool.insert(item(OpKind::Accept, 4)).expect("insert");
        let boxed = pool.remove(key).expect("remove");
        pool.recycle(boxed);
        let reused = pool.insert(item(OpKind::Send, 5)).expect("reinsert");
        assert_eq!(reused.index(), key.index());
        assert_ne!(reused.generation(), key.generation());
        assert!(pool.get(key).is_none());
        assert_eq!(pool.get(reused).map(|i| i.fd), Some(5));
    }

    #[test]
    fn key_bits_round_trip() {
        let key = ItemKey {
            index: 0x1234_5678,
            generation: 0x9abc_def0,
        };
        assert_eq!(ItemKey::from_bits(key.to_bits()), key);
    }

    #[test]
    fn slots_are_reused_through_free_list() {
        let mut pool = ItemPool::new();
        let a = pool.insert(item(OpKind::Recv, 1)).expect("a");
        let b = pool.insert(item(OpKind::Recv, 2)).expect("b");
        let boxed = pool.remove(a).expect("remove a");
        pool.recycle(boxed);
        let c = pool.insert(item(OpKind::Recv, 3)).expect("c");
        assert_eq!(c.index(), a.index());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(b).map(|i| i.fd), Some(2));
    }

    #[test]
    fn reset_drops_everything() {
        let mut pool = ItemPool::with_capacity(8);
        for fd in 0..5 {
            pool.insert(item(OpKind::Recv, fd)).expect("insert");
        }
        pool.reset();
        assert!(pool.is_empty());
        assert!(pool.insert(item(OpKind::Recv, 9)).is_some());
    }
}
