//! The cooperative scheduler: task queue, timers, tickers, and the
//! outer run loop.
//!
//! Single-threaded by design. Concurrency here is interleaving, not
//! parallelism: exactly one logical fiber executes bytecode at any
//! instant, so no lock guards any VM-owned state. The price is that a
//! native call which blocks synchronously stalls the whole machine —
//! a documented limitation of the model.
//!
//! Ordering guarantees:
//! - timers fire in non-decreasing deadline order, ties in
//!   registration order (the schedule key is `(deadline, seq)`);
//! - ready tasks are serviced before any timer that became due by the
//!   same pass (the queue drains before the schedule promotes);
//! - cancellation is best-effort and race-safe: clearing an unknown or
//!   already-fired id is a no-op, and a cleared ticker never fires
//!   again, though a firing already promoted to the queue still runs.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::VmResult;
use crate::value::heap::{Frame, HeapRef};
use crate::value::{HeapObject, Value};

use super::core::VM;
use super::fiber::SuspendedFiber;
use super::instruction::CompiledUnit;

/// Scheduler time source.
///
/// The monotonic clock sleeps the thread up to each deadline. The
/// virtual clock jumps straight to it — the literal reading of
/// "advance time to the earliest pending deadline" — which makes
/// scheduler runs deterministic and instant. Tests run on the virtual
/// clock.
#[derive(Debug, Clone)]
pub enum Clock {
    Monotonic,
    Virtual { now: Instant },
}

impl Clock {
    pub fn monotonic() -> Clock {
        Clock::Monotonic
    }

    pub fn virtual_clock() -> Clock {
        Clock::Virtual {
            now: Instant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        match self {
            Clock::Monotonic => Instant::now(),
            Clock::Virtual { now } => *now,
        }
    }

    fn advance_to(&mut self, deadline: Instant) {
        match self {
            Clock::Monotonic => {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
            }
            Clock::Virtual { now } => {
                if deadline > *now {
                    *now = deadline;
                }
            }
        }
    }
}

/// A deferred unit of work.
#[derive(Debug, Clone)]
pub enum VMTask {
    /// Call a callable with up to four arguments.
    Callback {
        func: Value,
        args: SmallVec<[Value; 4]>,
    },
    /// Wake a suspended fiber, delivering a value at its suspend
    /// point.
    Resume { uid: u64, argument: Value },
}

impl VMTask {
    pub fn callback(func: Value, args: &[Value]) -> VMTask {
        VMTask::Callback {
            func,
            args: SmallVec::from_slice(args),
        }
    }

    pub fn resume(uid: u64, argument: Value) -> VMTask {
        VMTask::Resume { uid, argument }
    }
}

/// Schedule key: deadline first, then insertion sequence, so equal
/// deadlines fire in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduleKey {
    fire_at: Instant,
    seq: u64,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    /// One-shot: removed once fired or cleared.
    Timer,
    /// Re-schedules itself for `now + period` after each firing.
    Ticker { period: Duration },
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    id: u64,
    kind: ScheduleKind,
    task: VMTask,
}

pub struct Scheduler {
    pub(crate) clock: Clock,
    tasks: VecDeque<VMTask>,
    schedule: BTreeMap<ScheduleKey, ScheduleEntry>,
    /// id → current schedule key, for cancellation.
    index: FxHashMap<u64, ScheduleKey>,
    suspended: FxHashMap<u64, SuspendedFiber>,
    next_timer_id: u64,
    next_thread_uid: u64,
    seq: u64,
}

impl Scheduler {
    pub fn new(clock: Clock) -> Scheduler {
        Scheduler {
            clock,
            tasks: VecDeque::new(),
            schedule: BTreeMap::new(),
            index: FxHashMap::default(),
            suspended: FxHashMap::default(),
            next_timer_id: 0,
            // uid 0 belongs to the main flow
            next_thread_uid: 1,
            seq: 0,
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Enqueue for the next scheduling pass. FIFO among tasks.
    pub fn register_task(&mut self, task: VMTask) {
        self.tasks.push_back(task);
    }

    pub(crate) fn pop_task(&mut self) -> Option<VMTask> {
        self.tasks.pop_front()
    }

    // =========================================================================
    // Timers and tickers
    // =========================================================================

    fn insert_entry(&mut self, fire_at: Instant, entry: ScheduleEntry) {
        let key = ScheduleKey {
            fire_at,
            seq: self.seq,
        };
        self.seq += 1;
        self.index.insert(entry.id, key);
        self.schedule.insert(key, entry);
    }

    /// Insert a one-shot timer; returns its cancellation handle.
    pub fn register_timer(&mut self, fire_at: Instant, task: VMTask) -> u64 {
        let id = self.next_timer_id();
        self.insert_entry(
            fire_at,
            ScheduleEntry {
                id,
                kind: ScheduleKind::Timer,
                task,
            },
        );
        id
    }

    /// Insert a ticker: first firing at `now + period`, then
    /// re-inserted after every firing until cleared.
    pub fn register_ticker(&mut self, period: Duration, task: VMTask) -> u64 {
        let id = self.next_timer_id();
        let fire_at = self.clock.now() + period;
        self.insert_entry(
            fire_at,
            ScheduleEntry {
                id,
                kind: ScheduleKind::Ticker { period },
                task,
            },
        );
        id
    }

    /// Remove a pending timer. Clearing an already-fired or unknown id
    /// is a no-op, not an error.
    pub fn clear_timer(&mut self, id: u64) {
        if let Some(key) = self.index.remove(&id) {
            self.schedule.remove(&key);
        }
    }

    /// Prevent a ticker's future re-insertion. A firing already
    /// promoted to the ready queue still runs — dispatch is not
    /// retroactively cancelled — but nothing re-inserts afterwards.
    pub fn clear_ticker(&mut self, id: u64) {
        if let Some(key) = self.index.remove(&id) {
            self.schedule.remove(&key);
        }
    }

    fn next_timer_id(&mut self) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        id
    }

    pub(crate) fn has_schedule_entries(&self) -> bool {
        !self.schedule.is_empty()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.schedule.keys().next().map(|k| k.fire_at)
    }

    /// Move every entry with `fire_at <= now` into the ready queue, in
    /// key order. Tickers re-insert their next occurrence under the
    /// same id.
    ///
    /// The due set is snapshotted first so a zero-period ticker fires
    /// once per pass instead of re-promoting itself forever.
    pub(crate) fn promote_due(&mut self) -> usize {
        let now = self.clock.now();
        let due: Vec<ScheduleKey> = self
            .schedule
            .keys()
            .take_while(|key| key.fire_at <= now)
            .copied()
            .collect();

        for key in &due {
            let entry = self.schedule.remove(key).expect("due key is present");
            self.index.remove(&entry.id);
            match entry.kind {
                ScheduleKind::Timer => self.tasks.push_back(entry.task),
                ScheduleKind::Ticker { period } => {
                    self.tasks.push_back(entry.task.clone());
                    self.insert_entry(now + period, entry);
                }
            }
        }
        due.len()
    }

    // =========================================================================
    // Fibers
    // =========================================================================

    pub(crate) fn park_fiber(&mut self, fiber: SuspendedFiber) {
        let previous = self.suspended.insert(fiber.uid, fiber);
        debug_assert!(previous.is_none(), "fiber parked twice under one uid");
    }

    pub(crate) fn take_parked(&mut self, uid: u64) -> Option<SuspendedFiber> {
        self.suspended.remove(&uid)
    }

    pub(crate) fn is_parked(&self, uid: u64) -> bool {
        self.suspended.contains_key(&uid)
    }

    pub(crate) fn has_queued_resume(&self, uid: u64) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t, VMTask::Resume { uid: u, .. } if *u == uid))
    }

    pub(crate) fn next_thread_uid(&mut self) -> u64 {
        let uid = self.next_thread_uid;
        self.next_thread_uid += 1;
        uid
    }

    // =========================================================================
    // GC support
    // =========================================================================

    /// Everything the scheduler keeps alive: queued task values,
    /// scheduled task values, and the saved state of parked fibers.
    pub(crate) fn gather_roots(&self, values: &mut Vec<Value>, refs: &mut Vec<HeapRef>) {
        let task_roots = |task: &VMTask, values: &mut Vec<Value>| match task {
            VMTask::Callback { func, args } => {
                values.push(*func);
                values.extend_from_slice(args);
            }
            VMTask::Resume { argument, .. } => values.push(*argument),
        };

        for task in &self.tasks {
            task_roots(task, values);
        }
        for entry in self.schedule.values() {
            task_roots(&entry.task, values);
        }
        for fiber in self.suspended.values() {
            values.extend_from_slice(&fiber.stack);
            if let Some(frame) = fiber.frame {
                refs.push(frame);
            }
            if let Some(ct) = fiber.catchstack {
                refs.push(ct);
            }
        }
    }
}

// =============================================================================
// The outer run loop
// =============================================================================

impl VM {
    /// Current scheduler time.
    pub fn now(&self) -> Instant {
        self.scheduler.now()
    }

    /// Enqueue a task for the next scheduling opportunity.
    pub fn register_task(&mut self, task: VMTask) {
        self.scheduler.register_task(task);
    }

    /// Register a one-shot timer; returns a cancellation handle.
    pub fn register_timer(&mut self, fire_at: Instant, task: VMTask) -> u64 {
        self.scheduler.register_timer(fire_at, task)
    }

    /// Register a repeating ticker; first firing at `now + period`.
    pub fn register_ticker(&mut self, period: Duration, task: VMTask) -> u64 {
        self.scheduler.register_ticker(period, task)
    }

    pub fn clear_timer(&mut self, id: u64) {
        self.scheduler.clear_timer(id);
    }

    pub fn clear_ticker(&mut self, id: u64) {
        self.scheduler.clear_ticker(id);
    }

    /// Load a compiled unit and run it to completion: the entry block
    /// first, then every scheduled task, timer and ticker until the
    /// machine goes idle or exits.
    ///
    /// Returns the entry flow's result value (null if the entry
    /// suspended and finished as a fiber). An exception escaping the
    /// entry flow fails the call; an exception escaping a scheduled
    /// fiber terminates that fiber only and is retained for
    /// [`VM::take_fiber_errors`].
    pub fn execute(&mut self, unit: CompiledUnit) -> VmResult<Value> {
        self.load_unit(unit)?;

        let entry = self.block;
        let lvarcount = self.code_block(entry).lvarcount as usize;
        let frame_value = self.alloc_value(HeapObject::Frame(Frame {
            parent: None,
            environment: None,
            locals: vec![Value::NULL; lvarcount],
            self_value: Value::NULL,
            return_block: entry,
            return_ip: 0,
            catchtable: None,
            halt_after_return: true,
            stacksize_at_entry: 0,
        }));
        self.frame = frame_value.as_heap_ref();
        self.stack.clear();
        self.catchstack = None;
        self.uid = 0;

        self.run_dispatch()?;
        if let Some(err) = self.uncaught.take() {
            return Err(err);
        }
        let result = self.stack.pop().unwrap_or(Value::NULL);

        self.run_scheduler()?;
        Ok(result)
    }

    /// Drive the scheduler without a compiled unit: drain every
    /// registered task, timer and ticker until the machine goes idle.
    /// This is the embedder surface for purely native workloads;
    /// `execute` calls the same loop after its entry flow.
    pub fn start_runtime(&mut self) -> VmResult<()> {
        self.run_scheduler()
    }

    /// Drain ready work; when nothing is runnable, advance time to the
    /// earliest pending deadline and promote everything due.
    ///
    /// Terminates when the queue is empty and no timer or ticker
    /// remains pending. A fiber still parked at that point can never
    /// be woken — no wake-up source exists in a single-threaded
    /// machine — so the loop exits; such fibers stay parked and report
    /// `Suspended` forever.
    pub(crate) fn run_scheduler(&mut self) -> VmResult<()> {
        while self.running {
            while let Some(task) = self.scheduler.pop_task() {
                self.run_task(task)?;
                if !self.running {
                    return Ok(());
                }
            }
            match self.scheduler.next_deadline() {
                None => break,
                Some(deadline) => {
                    self.scheduler.clock.advance_to(deadline);
                    self.scheduler.promote_due();
                }
            }
        }
        Ok(())
    }

    fn run_task(&mut self, task: VMTask) -> VmResult<()> {
        match task {
            VMTask::Resume { uid, argument } => {
                // Unknown or already-woken uid: documented no-op
                let fiber = match self.scheduler.take_parked(uid) {
                    Some(fiber) => fiber,
                    None => return Ok(()),
                };
                self.restore_fiber(fiber, argument);
                self.run_dispatch()?;
            }
            VMTask::Callback { func, args } => {
                self.stack.clear();
                self.frame = None;
                self.catchstack = None;
                self.uid = self.scheduler.next_thread_uid();
                // A native callee (or a throw with no handler) halts
                // inline; a bytecode callee pushes a frame and runs.
                self.halted = false;
                self.invoke_callable(func, &args, true)?;
                if !self.halted {
                    self.run_dispatch()?;
                }
            }
        }

        // An unrecovered error terminates the fiber, not the machine
        if let Some(err) = self.uncaught.take() {
            self.fiber_errors.push(err);
        }
        Ok(())
    }
}
