//! Syscall handlers: the runtime services compiled code can reach.
//!
//! This is the only surface through which library-level sync and
//! timer constructs are expressed. Argument checks throw catchable
//! exceptions, matching every other type error.

use std::time::Duration;

use crate::error::VmResult;
use crate::value::{HeapObject, Value};

use super::core::VM;
use super::instruction::Syscall;
use super::scheduler::VMTask;

impl VM {
    pub(crate) fn execute_syscall(&mut self, id: Syscall) -> VmResult<()> {
        match id {
            Syscall::TimerInit => {
                let duration = self.pop_stack()?;
                let callback = self.pop_stack()?;
                let Some(ms) = as_unsigned(duration) else {
                    self.throw_message("Expected timer duration to be a number");
                    return Ok(());
                };
                if !self.is_callable(callback) {
                    self.throw_message("Expected timer callback to be a function");
                    return Ok(());
                }
                if ms == 0 {
                    // Zero delay: straight to the task queue, serviced
                    // before any timer due by the next pass
                    self.scheduler
                        .register_task(VMTask::callback(callback, &[]));
                    self.push_stack(Value::NULL);
                } else {
                    let fire_at = self.scheduler.now() + Duration::from_millis(ms);
                    let id = self
                        .scheduler
                        .register_timer(fire_at, VMTask::callback(callback, &[]));
                    self.push_stack(Value::number(id as i64));
                }
            }

            Syscall::TimerClear => {
                let id = self.pop_stack()?;
                let Some(id) = as_unsigned(id) else {
                    self.throw_message("Expected timer id to be a number");
                    return Ok(());
                };
                self.scheduler.clear_timer(id);
                self.push_stack(Value::NULL);
            }

            Syscall::TickerInit => {
                let period = self.pop_stack()?;
                let callback = self.pop_stack()?;
                let Some(ms) = as_unsigned(period) else {
                    self.throw_message("Expected ticker period to be a number");
                    return Ok(());
                };
                if !self.is_callable(callback) {
                    self.throw_message("Expected ticker callback to be a function");
                    return Ok(());
                }
                let id = self
                    .scheduler
                    .register_ticker(Duration::from_millis(ms), VMTask::callback(callback, &[]));
                self.push_stack(Value::number(id as i64));
            }

            Syscall::TickerClear => {
                let id = self.pop_stack()?;
                let Some(id) = as_unsigned(id) else {
                    self.throw_message("Expected ticker id to be a number");
                    return Ok(());
                };
                self.scheduler.clear_ticker(id);
                self.push_stack(Value::NULL);
            }

            Syscall::FiberSuspend => {
                self.suspend_current_fiber();
            }

            Syscall::FiberResume => {
                let argument = self.pop_stack()?;
                let uid = self.pop_stack()?;
                let Some(uid) = as_unsigned(uid) else {
                    self.throw_message("Expected fiber uid to be a number");
                    return Ok(());
                };
                // Unknown or non-suspended uid: no-op at this surface
                self.resume_thread(uid, argument);
                self.push_stack(Value::NULL);
            }

            Syscall::FiberUid => {
                self.push_stack(Value::number(self.uid as i64));
            }

            Syscall::CopyValue => {
                let value = self.pop_stack()?;
                let copied = self.heap.copy_value(value);
                self.push_stack(copied);
            }

            Syscall::CastString => {
                let value = self.pop_stack()?;
                let rendered = self.heap.display_value(value);
                let string = self.alloc_value(HeapObject::String(rendered.into()));
                self.push_stack(string);
            }

            Syscall::Exit => {
                let status = self.pop_stack()?;
                self.exit_status = status.to_int().unwrap_or(0) as i32;
                self.running = false;
                self.halted = true;
            }
        }
        Ok(())
    }
}

/// Numeric argument as a non-negative integer; `None` for non-numbers.
fn as_unsigned(value: Value) -> Option<u64> {
    value.to_int().map(|n| n.max(0) as u64)
}
