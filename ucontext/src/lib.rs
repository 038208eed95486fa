//! Execution slots: a dedicated stack plus the two saved contexts (caller and
//! callee) needed to run a function on it and to switch back and forth.

use std::{alloc::Layout, any::Any, cell::Cell, marker::PhantomData, panic::AssertUnwindSafe, ptr::NonNull};

mod registry;
mod sys;

pub use registry::{live_slots, SlotId};
pub use sys::Stack;

use sys::asm;

pub(crate) type PhantomUnsend = std::marker::PhantomData<std::sync::MutexGuard<'static, ()>>;

/// Default usable stack size of a slot
pub const DEFAULT_STACK_SIZE: usize = 65536 * std::mem::size_of::<usize>();

/// Smallest usable stack size a slot accepts, requests below are rounded up
pub fn min_stack_size() -> usize {
    sys::platform_min_stack_size()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Stack prepared, body not entered yet
    Constructed,
    /// The body owns the thread
    Running,
    /// The body is parked in [`Suspender::suspend`]
    Suspended,
    /// The body returned (or panicked)
    Finished,
}

/// How control came back from [`ExecutionSlot::resume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transfer {
    Suspended,
    Returned,
}

/// Payload unwinding a suspended body whose slot is dropped
struct ForcedUnwind;

struct VTable {
    start: unsafe fn(NonNull<SlotHeader>),
    drop_erased: unsafe fn(NonNull<SlotHeader>),
    layout: Layout,
}

pub(crate) struct SlotHeader {
    vtable: &'static VTable,
    id: Cell<SlotId>,
    state: Cell<SlotState>,
    cancelled: Cell<bool>,
    caller_sp: Cell<*mut ()>,
    callee_sp: Cell<*mut ()>,
    panic: Cell<Option<Box<dyn Any + Send>>>,
    stack: Stack,
}

impl SlotHeader {
    fn make(vtable: &'static VTable, stack: Stack) -> Self {
        Self {
            vtable,
            id: Cell::new(SlotId::from_usize(0)),
            state: Cell::new(SlotState::Constructed),
            cancelled: Cell::new(false),
            caller_sp: Cell::new(std::ptr::null_mut()),
            callee_sp: Cell::new(std::ptr::null_mut()),
            panic: Cell::new(None),
            stack,
        }
    }

    /// Runs the callee until it suspends or finishes
    #[inline(always)]
    fn enter(&self) {
        self.state.set(SlotState::Running);
        let previous = registry::set_current(Some(self.id.get()));
        unsafe { asm::__lazyco_uctx_asm_swap(self.caller_sp.as_ptr(), self.callee_sp.get()) };
        registry::set_current(previous);
    }

    #[inline(always)]
    fn leave(&self) {
        unsafe { asm::__lazyco_uctx_asm_swap(self.callee_sp.as_ptr(), self.caller_sp.get()) };
    }

    fn force_unwind(&self) {
        let id = self.id.get().as_usize();
        log::debug!("slot {id}: dropped while suspended, unwinding its stack");
        self.cancelled.set(true);
        self.enter();
        if self.state.get() != SlotState::Finished {
            die("Coroutine kept running after a forced unwind");
        }
        if self.panic.take().is_some() {
            log::error!("slot {id}: panicked while being unwound");
        }
    }
}

#[repr(C)]
struct SlotBody<F> {
    header: SlotHeader,
    body: Cell<Option<F>>,
}

impl<F: FnOnce(&Suspender)> SlotBody<F> {
    const VTABLE: VTable = VTable {
        start: Self::start,
        drop_erased: Self::drop_erased,
        layout: Layout::new::<Self>(),
    };

    fn make(body: F, stack: Stack) -> std::io::Result<NonNull<SlotHeader>> {
        let thiz = unsafe { std::alloc::alloc(Self::VTABLE.layout) } as *mut Self;
        if thiz.is_null() {
            return Err(std::io::ErrorKind::OutOfMemory.into());
        }
        unsafe {
            thiz.write(Self {
                header: SlotHeader::make(&Self::VTABLE, stack),
                body: Cell::new(Some(body)),
            });
            Ok(NonNull::new_unchecked(thiz).cast())
        }
    }

    unsafe fn start(header: NonNull<SlotHeader>) {
        let thiz = unsafe { header.cast::<Self>().as_ref() };
        if let Some(body) = thiz.body.take() {
            let suspender = Suspender {
                header,
                _unsend: PhantomData,
            };
            body(&suspender);
        }
    }

    unsafe fn drop_erased(header: NonNull<SlotHeader>) {
        let thiz = header.cast::<Self>().as_ptr();
        unsafe {
            std::ptr::drop_in_place(thiz);
            std::alloc::dealloc(thiz as *mut u8, Self::VTABLE.layout);
        }
    }
}

/// Boot target of every slot: `id` is the only thing crossing the entry frame
unsafe extern "C" fn slot_entry(id: usize) -> ! {
    let header = match registry::lookup(SlotId::from_usize(id)) {
        Some(header) => header,
        None => die("Coroutine entered with an unknown slot id"),
    };
    let slot = unsafe { header.as_ref() };
    log::trace!("slot {id}: entered");
    let start = slot.vtable.start;
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| unsafe { start(header) })) {
        if !payload.is::<ForcedUnwind>() {
            slot.panic.set(Some(payload));
        }
    }
    slot.state.set(SlotState::Finished);
    log::trace!("slot {id}: finished");
    slot.leave();
    die("Finished coroutine resumed");
}

/// A function running on its own stack, resumed and suspended explicitly.
///
/// Dropping a slot whose body is suspended unwinds the body first, so every
/// value it holds is dropped before the stack is released.
pub struct ExecutionSlot<'a> {
    header: NonNull<SlotHeader>,
    _body: PhantomData<&'a ()>,
}

impl<'a> ExecutionSlot<'a> {
    pub fn new<F: FnOnce(&Suspender) + 'a>(body: F) -> std::io::Result<Self> {
        Self::with_stack_size(body, DEFAULT_STACK_SIZE)
    }

    /// Allocates the stack and prepares the entry frame ; `body` only starts
    /// on the first [`resume`](Self::resume).
    pub fn with_stack_size<F: FnOnce(&Suspender) + 'a>(body: F, stack_size: usize) -> std::io::Result<Self> {
        let mut stack = Stack::with_size(stack_size);
        stack.allocate()?;
        let header = SlotBody::make(body, stack)?;
        let slot = Self {
            header,
            _body: PhantomData,
        };
        let id = registry::register(header);
        unsafe {
            let inner = &mut *header.as_ptr();
            inner.id.set(id);
            let sp = asm::setup_coroutine_on_stack(&mut inner.stack, slot_entry, id.as_usize());
            inner.callee_sp.set(sp);
        }
        log::trace!("slot {}: created with {} bytes of stack", id.as_usize(), slot.stack_size());
        Ok(slot)
    }

    #[inline(always)]
    fn header(&self) -> &SlotHeader {
        unsafe { self.header.as_ref() }
    }

    /// Transfers control to the body until it suspends or returns.
    ///
    /// A panic of the body is re-raised here, the slot is then finished.
    ///
    /// # Panics
    /// When the slot is already finished.
    pub fn resume(&mut self) -> Transfer {
        let header = self.header();
        match header.state.get() {
            SlotState::Constructed | SlotState::Suspended => {}
            SlotState::Running => die("Coroutine resumed while running"),
            SlotState::Finished => panic!("resume called on a finished coroutine"),
        }
        header.enter();
        match header.state.get() {
            SlotState::Suspended => Transfer::Suspended,
            SlotState::Finished => {
                if let Some(payload) = header.panic.take() {
                    std::panic::resume_unwind(payload);
                }
                Transfer::Returned
            }
            _ => die("Coroutine switched back in an inconsistent state"),
        }
    }

    #[inline(always)]
    pub fn state(&self) -> SlotState {
        self.header().state.get()
    }

    #[inline(always)]
    pub fn is_finished(&self) -> bool {
        self.state() == SlotState::Finished
    }

    #[inline(always)]
    pub fn id(&self) -> SlotId {
        self.header().id.get()
    }

    /// Usable stack size, without the guard page
    pub fn stack_size(&self) -> usize {
        self.header().stack.size()
    }
}

impl Drop for ExecutionSlot<'_> {
    fn drop(&mut self) {
        let header = self.header();
        match header.state.get() {
            SlotState::Suspended => header.force_unwind(),
            SlotState::Running => die("Coroutine dropped while running"),
            SlotState::Constructed | SlotState::Finished => {}
        }
        registry::unregister(header.id.get());
        let drop_erased = header.vtable.drop_erased;
        unsafe { drop_erased(self.header) };
    }
}

impl std::fmt::Debug for ExecutionSlot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSlot")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("stack_size", &self.stack_size())
            .finish()
    }
}

/// Capability handed to a slot body to give control back to its caller
pub struct Suspender {
    header: NonNull<SlotHeader>,
    _unsend: PhantomUnsend,
}

impl Suspender {
    /// Gives control back to the caller of [`ExecutionSlot::resume`] and
    /// returns when the slot is resumed again.
    ///
    /// Unwinds when the slot is dropped instead of resumed.
    pub fn suspend(&self) {
        let header = unsafe { self.header.as_ref() };
        if header.state.get() != SlotState::Running || registry::current() != Some(header.id.get()) {
            die("Suspend called outside of its running coroutine");
        }
        header.state.set(SlotState::Suspended);
        header.leave();
        if header.cancelled.get() {
            std::panic::resume_unwind(Box::new(ForcedUnwind));
        }
    }

    pub fn id(&self) -> SlotId {
        unsafe { self.header.as_ref() }.id.get()
    }
}

/// The slot running on this thread, `None` on a thread's own stack
pub fn current_slot() -> Option<SlotId> {
    registry::current()
}

pub fn die(message: &str) -> ! {
    log::error!("{}, aborting.", message);
    eprintln!("{}, aborting.", message);
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_resume_suspend() {
        let steps = Cell::new(0);
        let mut slot = ExecutionSlot::new(|suspender| {
            steps.set(1);
            suspender.suspend();
            steps.set(2);
            suspender.suspend();
            steps.set(3);
        })
        .unwrap();
        assert_eq!(slot.state(), SlotState::Constructed);
        assert_eq!(steps.get(), 0);

        assert_eq!(slot.resume(), Transfer::Suspended);
        assert_eq!((steps.get(), slot.state()), (1, SlotState::Suspended));
        assert_eq!(slot.resume(), Transfer::Suspended);
        assert_eq!(steps.get(), 2);
        assert_eq!(slot.resume(), Transfer::Returned);
        assert_eq!(steps.get(), 3);
        assert!(slot.is_finished());
    }

    #[test]
    fn test_return_without_suspend() {
        let mut slot = ExecutionSlot::new(|_| {}).unwrap();
        assert_eq!(slot.resume(), Transfer::Returned);
        assert_eq!(slot.state(), SlotState::Finished);
    }

    #[test]
    #[should_panic(expected = "finished coroutine")]
    fn test_resume_finished_panics() {
        let mut slot = ExecutionSlot::new(|_| {}).unwrap();
        slot.resume();
        slot.resume();
    }

    #[test]
    fn test_locals_survive_switches() {
        let seen = Cell::new(0u64);
        let mut slot = ExecutionSlot::with_stack_size(
            |suspender| {
                let mut acc = [0u64; 64];
                for round in 0..10u64 {
                    for (i, v) in acc.iter_mut().enumerate() {
                        *v += round * i as u64;
                    }
                    seen.set(acc.iter().sum());
                    suspender.suspend();
                }
            },
            16 * 1024,
        )
        .unwrap();
        let mut expected = 0u64;
        for round in 0..10u64 {
            assert_eq!(slot.resume(), Transfer::Suspended);
            expected += round * (0..64u64).sum::<u64>();
            assert_eq!(seen.get(), expected);
        }
        assert_eq!(slot.resume(), Transfer::Returned);
    }

    #[test]
    fn test_deep_recursion_on_slot_stack() {
        fn depth(n: u32, suspender: &Suspender) -> u32 {
            if n == 0 {
                suspender.suspend();
                0
            } else {
                let pad = std::hint::black_box([0u8; 32]);
                1 + depth(n - 1, suspender) + pad[0] as u32
            }
        }
        let result = Cell::new(0);
        let mut slot = ExecutionSlot::new(|suspender| result.set(depth(1000, suspender))).unwrap();
        assert_eq!(slot.resume(), Transfer::Suspended);
        assert_eq!(slot.resume(), Transfer::Returned);
        assert_eq!(result.get(), 1000);
    }

    #[test]
    fn test_panic_is_reraised_on_resume() {
        let mut slot = ExecutionSlot::new(|suspender| {
            suspender.suspend();
            std::panic::panic_any(42u32);
        })
        .unwrap();
        assert_eq!(slot.resume(), Transfer::Suspended);
        let payload = std::panic::catch_unwind(AssertUnwindSafe(|| slot.resume())).unwrap_err();
        assert_eq!(payload.downcast_ref::<u32>(), Some(&42));
        assert!(slot.is_finished());
    }

    #[test]
    fn test_drop_suspended_unwinds_body() {
        struct Guard(Rc<Cell<bool>>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }
        let dropped = Rc::new(Cell::new(false));
        let after_suspend = Rc::new(Cell::new(false));
        let (d, a) = (dropped.clone(), after_suspend.clone());
        let mut slot = ExecutionSlot::new(move |suspender| {
            let _guard = Guard(d);
            suspender.suspend();
            a.set(true);
        })
        .unwrap();
        assert_eq!(slot.resume(), Transfer::Suspended);
        assert!(!dropped.get());
        drop(slot);
        assert!(dropped.get());
        assert!(!after_suspend.get());
    }

    struct DropFlag(Rc<Cell<bool>>);
    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn test_drop_suspended_unwinds_nested_slots() {
        let outer_released = Rc::new(Cell::new(false));
        let inner_released = Rc::new(Cell::new(false));
        let (o, i) = (outer_released.clone(), inner_released.clone());
        let mut outer = ExecutionSlot::new(move |suspender| {
            let _flag = DropFlag(o);
            let mut inner = ExecutionSlot::new(move |inner_suspender| {
                let _flag = DropFlag(i);
                inner_suspender.suspend();
            })
            .unwrap();
            assert_eq!(inner.resume(), Transfer::Suspended);
            suspender.suspend();
            inner.resume();
        })
        .unwrap();
        assert_eq!(outer.resume(), Transfer::Suspended);
        let live = live_slots();
        drop(outer);
        assert!(inner_released.get());
        assert!(outer_released.get());
        assert_eq!(live_slots(), live - 2);
        assert_eq!(current_slot(), None);
    }

    #[test]
    fn test_drop_suspended_while_caller_panics() {
        let released = Rc::new(Cell::new(false));
        let flag = released.clone();
        let mut slot = ExecutionSlot::new(move |suspender| {
            let _flag = DropFlag(flag);
            suspender.suspend();
        })
        .unwrap();
        assert_eq!(slot.resume(), Transfer::Suspended);
        let caught = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let _slot = slot;
            panic!("caller failure");
        }));
        let payload = caught.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"caller failure"));
        assert!(released.get());
    }

    #[test]
    fn test_drop_unstarted_drops_body() {
        let token = Rc::new(());
        let held = token.clone();
        let slot = ExecutionSlot::new(move |_| drop(held)).unwrap();
        assert_eq!(Rc::strong_count(&token), 2);
        drop(slot);
        assert_eq!(Rc::strong_count(&token), 1);
    }

    #[test]
    fn test_registry_tracks_live_slots() {
        let before = live_slots();
        let mut a = ExecutionSlot::new(|s| s.suspend()).unwrap();
        let b = ExecutionSlot::new(|_| {}).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(live_slots(), before + 2);
        a.resume();
        drop(a);
        drop(b);
        assert_eq!(live_slots(), before);
    }

    #[test]
    fn test_current_slot_and_nesting() {
        let trace = std::cell::RefCell::new(Vec::new());
        assert_eq!(current_slot(), None);
        let mut outer = ExecutionSlot::new(|outer_suspender| {
            let outer_id = outer_suspender.id();
            assert_eq!(current_slot(), Some(outer_id));
            let mut inner = ExecutionSlot::new(|inner_suspender| {
                assert_eq!(current_slot(), Some(inner_suspender.id()));
                trace.borrow_mut().push("inner 1");
                inner_suspender.suspend();
                trace.borrow_mut().push("inner 2");
            })
            .unwrap();
            inner.resume();
            assert_eq!(current_slot(), Some(outer_id));
            trace.borrow_mut().push("outer 1");
            outer_suspender.suspend();
            inner.resume();
            trace.borrow_mut().push("outer 2");
        })
        .unwrap();
        assert_eq!(outer.resume(), Transfer::Suspended);
        assert_eq!(current_slot(), None);
        assert_eq!(outer.resume(), Transfer::Returned);
        assert_eq!(*trace.borrow(), ["inner 1", "outer 1", "inner 2", "outer 2"]);
    }

    #[test]
    fn test_small_stack_request_is_rounded_up() {
        let slot = ExecutionSlot::with_stack_size(|_| {}, 1).unwrap();
        assert!(slot.stack_size() >= min_stack_size());
        assert_eq!(slot.stack_size() % Stack::page_size(), 0);
    }
}
