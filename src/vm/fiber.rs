//! Fibers: cooperative, suspendable execution contexts.
//!
//! A fiber is saved interpreter state, not a native stack. Because
//! frames live on the heap and dispatch never recurses, suspension
//! captures exactly: the operand stack, the frame and catch-table
//! chain heads, and the block/ip cursor. Resumption restores those
//! fields and pushes the delivered value as the result of the suspend
//! call.
//!
//! State machine: Running → (suspend) → Suspended → (resume) →
//! Runnable, carrying the resume value → (scheduler dispatch) →
//! Running → (fall-through or unrecovered error) → Terminated.

use smallvec::SmallVec;

use crate::value::heap::HeapRef;
use crate::value::Value;

use super::core::VM;
use super::instruction::BlockId;
use super::scheduler::VMTask;

/// Observable fiber state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    Running,
    Suspended,
    Runnable,
    Terminated,
}

impl FiberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FiberStatus::Running => "running",
            FiberStatus::Suspended => "suspended",
            FiberStatus::Runnable => "runnable",
            FiberStatus::Terminated => "terminated",
        }
    }
}

/// A parked fiber: everything needed to continue bytecode execution.
#[derive(Debug)]
pub struct SuspendedFiber {
    pub uid: u64,
    pub(crate) stack: Vec<Value>,
    pub(crate) frame: Option<HeapRef>,
    pub(crate) catchstack: Option<HeapRef>,
    pub(crate) block: BlockId,
    pub(crate) ip: usize,
}

impl VM {
    /// Park the currently running fiber and yield to the scheduler.
    ///
    /// The cursor has already advanced past the suspend syscall, so
    /// the saved ip is the resume point; the resume value is pushed
    /// there as the syscall's result.
    pub(crate) fn suspend_current_fiber(&mut self) {
        let fiber = SuspendedFiber {
            uid: self.uid,
            stack: self.stack.drain(..).collect(),
            frame: self.frame.take(),
            catchstack: self.catchstack.take(),
            block: self.block,
            ip: self.ip,
        };
        self.scheduler.park_fiber(fiber);
        self.halted = true;
    }

    /// Restore a parked fiber and deliver `value` at its suspend
    /// point.
    pub(crate) fn restore_fiber(&mut self, fiber: SuspendedFiber, value: Value) {
        self.stack = SmallVec::from_vec(fiber.stack);
        self.frame = fiber.frame;
        self.catchstack = fiber.catchstack;
        self.block = fiber.block;
        self.ip = fiber.ip;
        self.uid = fiber.uid;
        self.push_stack(value);
    }

    /// Transition a suspended fiber to runnable, delivering `value`.
    ///
    /// Returns whether a fiber was actually woken. An unknown or
    /// non-suspended uid is a no-op by design — cancellation and
    /// wake-up race freely in library code — but the embedder surface
    /// makes the outcome observable instead of silent. Duplicate
    /// resumes deliver the value exactly once: dispatch takes the
    /// fiber out of the parked set, and later resumes find nothing.
    pub fn resume_thread(&mut self, uid: u64, value: Value) -> bool {
        if !self.scheduler.is_parked(uid) {
            return false;
        }
        self.scheduler.register_task(VMTask::resume(uid, value));
        true
    }
}
