//! Stack slots for values that have no register
//!
//! Slots come in three size classes. Free slots sit on one list per size;
//! an 8-byte slot can hold two independent 4-byte values. A half-used
//! 8-byte slot is offered to 4-byte requests, but only callers that accept
//! an offset get its second half.
//!
//! The free lists can be locked. While locked, freed slots become empty but
//! are not returned to any list, so the next request gets a fresh slot. The
//! register assigner uses this around merge points so a virtual register
//! keeps the same slot on every path.

use crate::config::GraConfig;
use gra_common::{DataType, SymRefNumber};
use gra_ir::{Method, Symbol, SymbolKind};
use log::{debug, trace};
use std::collections::VecDeque;

/// Index of a slot in its `SpillTempManager`
pub type SpillSlotId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct BackingStore {
    /// Symbol naming the slot in the method
    pub symref: SymRefNumber,
    /// 4, 8 or 16 bytes
    pub size: u32,
    pub first_half_occupied: bool,
    pub second_half_occupied: bool,
    pub contains_collected_reference: bool,
    /// Index in the stack map, assigned the first time the slot holds a
    /// collected reference
    pub gc_map_index: Option<u32>,
    /// Internal-pointer slots are only shared between pointers into the
    /// same array
    pub pinning_array: Option<SymRefNumber>,
}

impl BackingStore {
    pub fn is_occupied(&self) -> bool {
        self.first_half_occupied && self.second_half_occupied
    }

    pub fn is_empty(&self) -> bool {
        !self.first_half_occupied && !self.second_half_occupied
    }

    fn set_occupied(&mut self) {
        self.first_half_occupied = true;
        self.second_half_occupied = true;
    }

    fn set_empty(&mut self) {
        self.first_half_occupied = false;
        self.second_half_occupied = false;
    }
}

/// A slot handed out by `allocate_spill`, with the byte offset of the part
/// the caller may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpillAllocation {
    pub slot: SpillSlotId,
    pub offset: u32,
}

pub struct SpillTempManager {
    reference_size: u32,
    disable_half_slot_spills: bool,
    force_large_ra_moves: bool,
    slots: Vec<BackingStore>,
    spill4_free: VecDeque<SpillSlotId>,
    spill8_free: VecDeque<SpillSlotId>,
    spill16_free: VecDeque<SpillSlotId>,
    internal_pointer_free: VecDeque<SpillSlotId>,
    collected: Vec<SpillSlotId>,
    locked: bool,
    next_gc_map_index: u32,
}

impl SpillTempManager {
    pub fn new(config: &GraConfig, reference_size: u32) -> Self {
        Self {
            reference_size,
            disable_half_slot_spills: config.disable_half_slot_spills,
            force_large_ra_moves: config.force_large_ra_moves,
            slots: Vec::new(),
            spill4_free: VecDeque::new(),
            spill8_free: VecDeque::new(),
            spill16_free: VecDeque::new(),
            internal_pointer_free: VecDeque::new(),
            collected: Vec::new(),
            locked: false,
            next_gc_map_index: 0,
        }
    }

    pub fn reference_size(&self) -> u32 {
        self.reference_size
    }

    pub fn slot(&self, id: SpillSlotId) -> &BackingStore {
        &self.slots[id]
    }

    /// Every slot created so far
    pub fn all_spills(&self) -> &[BackingStore] {
        &self.slots
    }

    /// Slots that have held a collected reference, newest first
    pub fn collected_spills(&self) -> impl Iterator<Item = SpillSlotId> + '_ {
        self.collected.iter().rev().copied()
    }

    pub fn lock_free_spill_list(&mut self) {
        self.locked = true;
    }

    pub fn unlock_free_spill_list(&mut self) {
        self.locked = false;
    }

    pub fn is_free_spill_list_locked(&self) -> bool {
        self.locked
    }

    fn min_spill_size(&self) -> u32 {
        if self.force_large_ra_moves {
            8
        } else {
            self.reference_size
        }
    }

    fn create_slot(&mut self, method: &mut Method, size: u32, pinning_array: Option<SymRefNumber>) -> SpillSlotId {
        let id = self.slots.len();
        let data_type = if pinning_array.is_some() {
            DataType::Address
        } else {
            DataType::NoType
        };
        let mut symbol = Symbol::new(format!("spill{}", id), SymbolKind::SpillTemp, data_type);
        symbol.pinning_array = pinning_array;
        let symref = method.add_symbol(symbol);
        self.slots.push(BackingStore {
            symref,
            size,
            first_half_occupied: false,
            second_half_occupied: false,
            contains_collected_reference: false,
            gc_map_index: None,
            pinning_array,
        });
        debug!("created {}-byte spill temp #{} (slot {})", size, symref, id);
        id
    }

    /// A slot for the thread register; never freed
    pub fn allocate_vm_thread_spill(&mut self, method: &mut Method) -> SpillSlotId {
        let size = self.min_spill_size();
        let id = self.create_slot(method, size, None);
        method.symbols[self.slots[id].symref].not_collected = true;
        self.slots[id].set_occupied();
        id
    }

    /// A slot for a pointer derived from `pinning_array`, reusing a free one
    /// that pins the same array
    pub fn allocate_internal_pointer_spill(&mut self, method: &mut Method, pinning_array: SymRefNumber) -> SpillSlotId {
        let reusable = self
            .internal_pointer_free
            .iter()
            .position(|&id| self.slots[id].pinning_array == Some(pinning_array));
        let id = match reusable.and_then(|index| self.internal_pointer_free.remove(index)) {
            Some(id) => {
                debug!("reusing internal pointer spill slot {} for #{}", id, pinning_array);
                id
            }
            None => {
                let size = self.min_spill_size();
                self.create_slot(method, size, Some(pinning_array))
            }
        };
        self.slots[id].set_occupied();
        id
    }

    /// Find or create a slot for `data_size` bytes
    ///
    /// A caller passing `accepts_offset` can use the second half of an
    /// 8-byte slot for a value of at most 4 bytes; the returned offset says
    /// which half it got. Without `reuse` a fresh slot is always created.
    pub fn allocate_spill(
        &mut self,
        method: &mut Method,
        data_size: u32,
        contains_collected_reference: bool,
        accepts_offset: bool,
        reuse: bool,
    ) -> SpillAllocation {
        assert!(data_size <= 16, "Spill temps hold at most 16 bytes, not {}", data_size);
        assert!(
            !contains_collected_reference || data_size == self.reference_size,
            "Collected references are {} bytes, not {}",
            self.reference_size,
            data_size
        );
        trace!(
            "  allocate_spill({}, {}, {})",
            data_size,
            if contains_collected_reference { "collected" } else { "uncollected" },
            if accepts_offset { "offset" } else { "no offset" }
        );
        let accepts_offset = accepts_offset && !self.disable_half_slot_spills;

        // A 4-byte collected reference in an 8-byte slot would be mapped as
        // a full slot by the stack map
        let try8 = data_size < 16 && (self.reference_size == 8 || !contains_collected_reference);
        let try16 = data_size == 16;

        let mut reused = None;
        if reuse {
            if data_size <= 4 {
                reused = self.pop_half_slot(accepts_offset);
            }
            if reused.is_none() && try8 {
                reused = self.spill8_free.pop_front();
            }
            if reused.is_none() && try16 {
                reused = self.spill16_free.pop_front();
            }
        }

        let id = match reused {
            Some(id) => {
                debug!("reusing spill slot {} (#{})", id, self.slots[id].symref);
                id
            }
            None => {
                let size = data_size.max(self.min_spill_size());
                assert!((4..=16).contains(&size), "Spill temps are between 4 and 16 bytes, not {}", size);
                self.create_slot(method, size, None)
            }
        };

        let mut offset = 0;
        let slot = &mut self.slots[id];
        if data_size <= 4 && slot.size == 8 {
            if slot.first_half_occupied {
                slot.second_half_occupied = true;
                offset = 4;
            } else if !accepts_offset || slot.second_half_occupied {
                slot.first_half_occupied = true;
            } else {
                slot.second_half_occupied = true;
                offset = 4;
                self.spill4_free.push_front(id);
            }
        } else {
            slot.set_occupied();
        }

        let slot = &mut self.slots[id];
        if contains_collected_reference && slot.gc_map_index.is_none() {
            slot.gc_map_index = Some(self.next_gc_map_index);
            self.next_gc_map_index += 1;
            self.collected.push(id);
            trace!("  slot {} added to collected spills", id);
        }
        slot.contains_collected_reference = contains_collected_reference;

        trace!(
            "  allocate_spill returning slot {} ({}{}), offset {}",
            id,
            slot.first_half_occupied as u8,
            slot.second_half_occupied as u8,
            offset
        );
        SpillAllocation { slot: id, offset }
    }

    /// Take an 8-byte slot from the 4-byte list whose free half this caller
    /// can use, or a genuine 4-byte slot
    fn pop_half_slot(&mut self, accepts_offset: bool) -> Option<SpillSlotId> {
        let index = self.spill4_free.iter().position(|&id| {
            let slot = &self.slots[id];
            slot.size <= 4 || !slot.first_half_occupied || accepts_offset
        })?;
        self.spill4_free.remove(index)
    }

    /// Release `data_size` bytes at `offset` of `id`
    pub fn free_spill(&mut self, id: SpillSlotId, data_size: u32, offset: u32) {
        assert!((1..=16).contains(&data_size), "Illegal spill size {}", data_size);
        assert!(offset == 0 || offset == 4, "Illegal spill offset {}", offset);
        assert!(data_size + offset <= 16, "Spill of {} bytes at offset {} overflows", data_size, offset);

        let update_free_list = !self.locked;
        let slot = &mut self.slots[id];
        trace!(
            "  free_spill(slot {} ({}{}), {}, {}, locked={})",
            id,
            slot.first_half_occupied as u8,
            slot.second_half_occupied as u8,
            data_size,
            offset,
            self.locked
        );

        if slot.pinning_array.is_some() {
            slot.set_empty();
            if update_free_list {
                self.internal_pointer_free.push_front(id);
                trace!("  -> internal pointer free list");
            }
        } else if data_size <= 4 && slot.size == 8 {
            if offset == 0 {
                slot.first_half_occupied = false;
            } else {
                slot.second_half_occupied = false;
            }
            let now_empty = slot.is_empty();
            if update_free_list {
                self.spill4_free.retain(|&s| s != id);
                if now_empty {
                    self.spill8_free.push_front(id);
                    trace!("  -> 8-byte free list");
                } else {
                    self.spill4_free.push_front(id);
                    trace!("  -> 4-byte free list (half free)");
                }
            }
        } else {
            slot.set_empty();
            if update_free_list {
                match slot.size {
                    size if size <= 4 => self.spill4_free.push_front(id),
                    8 => self.spill8_free.push_front(id),
                    _ => self.spill16_free.push_front(id),
                }
                trace!("  -> {}-byte free list", slot.size);
            }
        }
    }

    /// Forget every free slot; later requests get fresh slots
    pub fn jettison_all_spills(&mut self) {
        trace!("jettison_all_spills: clearing spill temp free lists");
        self.spill4_free.clear();
        self.spill8_free.clear();
        self.spill16_free.clear();
        self.internal_pointer_free.clear();
    }
}
