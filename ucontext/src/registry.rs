//! Per-thread table of live execution slots.
//!
//! A fresh context only receives one machine word at entry: the slot id. The
//! trampoline resolves it here instead of trusting a raw address.

use std::{
    cell::{Cell, RefCell},
    ptr::NonNull,
};

use rustc_hash::FxHashMap;

use crate::SlotHeader;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    #[inline(always)]
    pub fn as_usize(&self) -> usize {
        self.0
    }
    #[inline(always)]
    pub(crate) fn from_usize(id: usize) -> Self {
        Self(id)
    }
}

thread_local! {
    static CURRENT: Cell<Option<SlotId>> = const { Cell::new(None) };
    static NEXT_ID: Cell<usize> = const { Cell::new(1) };
    static LIVE_SLOTS: RefCell<FxHashMap<SlotId, NonNull<SlotHeader>>> =
        RefCell::new(FxHashMap::default());
}

pub(crate) fn register(header: NonNull<SlotHeader>) -> SlotId {
    let id = SlotId(NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id.wrapping_add(1).max(1));
        id
    }));
    LIVE_SLOTS.with_borrow_mut(|slots| {
        if slots.insert(id, header).is_some() {
            crate::die("Slot id reused while still alive");
        }
    });
    id
}

pub(crate) fn lookup(id: SlotId) -> Option<NonNull<SlotHeader>> {
    LIVE_SLOTS.with_borrow(|slots| slots.get(&id).copied())
}

pub(crate) fn unregister(id: SlotId) {
    LIVE_SLOTS.with_borrow_mut(|slots| {
        slots.remove(&id);
    });
}

/// Slot running on this thread
pub(crate) fn current() -> Option<SlotId> {
    CURRENT.get()
}

/// Returns the previously running slot
pub(crate) fn set_current(id: Option<SlotId>) -> Option<SlotId> {
    CURRENT.replace(id)
}

/// Number of slots alive on the current thread
pub fn live_slots() -> usize {
    LIVE_SLOTS.with_borrow(|slots| slots.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_unregister() {
        let mut dummy = std::mem::MaybeUninit::<SlotHeader>::uninit();
        let header = NonNull::new(dummy.as_mut_ptr()).unwrap();
        let before = live_slots();

        let a = register(header);
        let b = register(header);
        assert_ne!(a, b);
        assert_eq!(live_slots(), before + 2);
        assert_eq!(lookup(a), Some(header));

        unregister(a);
        assert_eq!(lookup(a), None);
        assert_eq!(lookup(b), Some(header));
        unregister(b);
        assert_eq!(live_slots(), before);
    }

    #[test]
    fn test_unknown_id() {
        assert_eq!(lookup(SlotId::from_usize(usize::MAX)), None);
    }
}
