//! The instruction dispatch loop.
//!
//! Flat by construction: calls push heap frames and move the block/ip
//! cursor, returns pop them. Nothing recurses on the Rust stack, so a
//! fiber suspension is a snapshot of four VM fields plus the operand
//! stack. Branch and handler offsets are relative to the instruction
//! *after* the branching one (the cursor has already advanced when the
//! instruction executes).

use rustc_hash::FxHashMap;

use crate::error::{RuntimeError, VmResult};
use crate::value::heap::{Array, CatchTable, Class, Function, HeapObject, Object};
use crate::value::repr::Symbol;
use crate::value::Value;

use super::core::VM;
use super::instruction::Instruction;

impl VM {
    /// Run instructions until something halts this dispatch: a
    /// `halt_after_return` frame returning, a suspension, an uncaught
    /// exception, or the `Exit` syscall.
    ///
    /// The `Err` path is reserved for fatal defects (malformed units,
    /// internal inconsistencies); language-level errors unwind through
    /// the catch-table chain inside `Ok`.
    pub(crate) fn run_dispatch(&mut self) -> VmResult<()> {
        self.halted = false;
        while !self.halted {
            let instruction = self.fetch()?;
            self.ip += 1;
            self.execute_instruction(instruction)?;
        }
        Ok(())
    }

    fn fetch(&self) -> VmResult<Instruction> {
        let block = self.code_block(self.block);
        block.code.get(self.ip).copied().ok_or_else(|| {
            RuntimeError::invalid_unit(format!(
                "execution ran off the end of block '{}'",
                block.name
            ))
        })
    }

    fn jump(&mut self, offset: i16) -> VmResult<()> {
        let target = self.ip as i64 + offset as i64;
        if target < 0 {
            return Err(RuntimeError::invalid_unit(format!(
                "branch target {} before start of block",
                target
            )));
        }
        self.ip = target as usize;
        Ok(())
    }

    fn execute_instruction(&mut self, instruction: Instruction) -> VmResult<()> {
        match instruction {
            Instruction::PutValue(index) => {
                let value = self.constant(index);
                self.push_stack(value);
            }

            Instruction::PutSelf => {
                let frame = self.current_frame()?;
                let value = self.frame_at(frame).self_value;
                self.push_stack(value);
            }

            Instruction::PutFunction {
                name,
                block,
                anonymous,
            } => {
                let sym = self.constant_symbol(name)?;
                let target = self.code_block(block);
                let (argc, lvarcount) = (target.argc, target.lvarcount);
                let value = self.alloc_value(HeapObject::Function(Function {
                    name: sym,
                    argc,
                    lvarcount,
                    context: self.frame,
                    block,
                    anonymous,
                    bound_self: None,
                }));
                self.push_stack(value);
            }

            Instruction::PutArray(count) => {
                let elements = self.pop_n(count as usize)?;
                let rooted = self.temp_roots.len();
                self.temp_roots.extend_from_slice(&elements);
                let value = self.alloc_value(HeapObject::Array(Array { elements }));
                self.temp_roots.truncate(rooted);
                self.push_stack(value);
            }

            Instruction::PutObject(count) => {
                let pairs = self.pop_n(count as usize * 2)?;
                let mut container = FxHashMap::default();
                for pair in pairs.chunks_exact(2) {
                    let key = match pair[0].as_symbol() {
                        Some(sym) => sym,
                        None => {
                            let got = self.heap.type_name_of(pair[0]);
                            self.throw_message(&format!(
                                "Object keys must be symbols, got {}",
                                got
                            ));
                            return Ok(());
                        }
                    };
                    container.insert(key, pair[1]);
                }
                let rooted = self.temp_roots.len();
                self.temp_roots.extend_from_slice(&pairs);
                let value = self.alloc_value(HeapObject::Object(Object {
                    klass: Value::NULL,
                    container,
                }));
                self.temp_roots.truncate(rooted);
                self.push_stack(value);
            }

            Instruction::PutClass {
                name,
                propertycount,
                methodcount,
                has_constructor,
                has_parent,
            } => {
                self.op_putclass(name, propertycount, methodcount, has_constructor, has_parent)?;
            }

            Instruction::Pop => {
                self.pop_stack()?;
            }

            Instruction::Dup => {
                let top = *self.stack.last().ok_or_else(|| {
                    RuntimeError::invalid_unit("dup on empty operand stack")
                })?;
                self.push_stack(top);
            }

            Instruction::ReadLocal { index, level } => {
                let frame = self.environment_at(level)?;
                let value = self
                    .frame_at(frame)
                    .locals
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| {
                        RuntimeError::invalid_unit(format!("local index {} out of range", index))
                    })?;
                self.push_stack(value);
            }

            Instruction::SetLocal { index, level } => {
                let value = self.pop_stack()?;
                let frame = self.environment_at(level)?;
                let locals = &mut self.frame_at_mut(frame).locals;
                match locals.get_mut(index as usize) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(RuntimeError::invalid_unit(format!(
                            "local index {} out of range",
                            index
                        )))
                    }
                }
            }

            Instruction::ReadGlobal(index) => {
                let sym = self.constant_symbol(index)?;
                match self.globals.get(&sym).copied() {
                    Some(value) => self.push_stack(value),
                    None => {
                        let name = self.symbols.decode(sym).to_string();
                        self.throw_message(&format!("Undefined global variable: {}", name));
                    }
                }
            }

            Instruction::SetGlobal(index) => {
                let sym = self.constant_symbol(index)?;
                let value = self.pop_stack()?;
                self.globals.insert(sym, value);
            }

            Instruction::ReadMember(index) => {
                let sym = self.constant_symbol(index)?;
                let target = self.pop_stack()?;
                self.op_readmember(target, sym);
            }

            Instruction::SetMember(index) => {
                let sym = self.constant_symbol(index)?;
                let value = self.pop_stack()?;
                let target = self.pop_stack()?;
                let outcome = match target.as_heap_ref() {
                    Some(r) => match self.heap.get_mut(r) {
                        HeapObject::Object(o) => {
                            o.container.insert(sym, value);
                            Ok(())
                        }
                        other => Err(other.type_name()),
                    },
                    None => Err(target.immediate_type_name()),
                };
                match outcome {
                    Ok(()) => self.push_stack(value),
                    Err(got) => {
                        self.throw_message(&format!("Cannot set member of type {}", got))
                    }
                }
            }

            Instruction::Call { argc } => {
                let args = self.pop_n(argc as usize)?;
                let callee = self.pop_stack()?;
                self.invoke_callable(callee, &args, false)?;
            }

            Instruction::New { argc } => {
                let args = self.pop_n(argc as usize)?;
                let class_value = self.pop_stack()?;
                match class_value.as_heap_ref().map(|r| self.heap.get(r)) {
                    Some(HeapObject::Class(c)) => {
                        let class = c.clone();
                        self.construct_class(class_value, class, &args, false)?;
                    }
                    _ => {
                        let got = self.heap.type_name_of(class_value);
                        self.throw_message(&format!(
                            "Attempted to construct from non-class type: {}",
                            got
                        ));
                    }
                }
            }

            Instruction::Return => {
                let frame_ref = self.current_frame()?;
                let frame = self.frame_at(frame_ref).clone();
                // Fall-through without a pushed result returns null
                let result = if self.stack.len() > frame.stacksize_at_entry {
                    self.pop_stack()?
                } else {
                    Value::NULL
                };
                self.stack.truncate(frame.stacksize_at_entry);
                self.push_stack(result);
                self.frame = frame.parent;
                self.catchstack = frame.catchtable;
                self.block = frame.return_block;
                self.ip = frame.return_ip;
                if frame.halt_after_return {
                    self.halted = true;
                }
            }

            Instruction::Throw => {
                let payload = self.pop_stack()?;
                self.throw_exception(payload);
            }

            Instruction::RegisterCatchTable { offset } => {
                let target = self.ip as i64 + offset as i64;
                if target < 0 {
                    return Err(RuntimeError::invalid_unit(format!(
                        "catch handler target {} before start of block",
                        target
                    )));
                }
                let table = CatchTable {
                    block: self.block,
                    ip: target as usize,
                    stacksize: self.stack.len(),
                    frame: self.frame,
                    parent: self.catchstack,
                };
                let value = self.alloc_value(HeapObject::CatchTable(table));
                self.catchstack = value.as_heap_ref();
            }

            Instruction::PopCatchTable => {
                let r = self.catchstack.ok_or_else(|| {
                    RuntimeError::invalid_unit("pop of empty catch-table chain")
                })?;
                self.catchstack = self.catchtable_at(r).parent;
            }

            Instruction::Branch { offset } => self.jump(offset)?,

            Instruction::BranchIf { offset } => {
                let condition = self.pop_stack()?;
                if condition.truthy() {
                    self.jump(offset)?;
                }
            }

            Instruction::BranchUnless { offset } => {
                let condition = self.pop_stack()?;
                if !condition.truthy() {
                    self.jump(offset)?;
                }
            }

            Instruction::Syscall(id) => self.execute_syscall(id)?,

            Instruction::Halt => {
                self.halted = true;
            }
        }
        Ok(())
    }

    /// Frame `level` lexical hops above the current one.
    fn environment_at(&self, level: u8) -> VmResult<crate::value::HeapRef> {
        let mut frame = self.current_frame()?;
        for _ in 0..level {
            frame = self.frame_at(frame).environment.ok_or_else(|| {
                RuntimeError::invalid_unit(format!("lexical level {} out of range", level))
            })?;
        }
        Ok(frame)
    }

    /// Member lookup: own fields first, then the class prototype
    /// chain. Methods found on a prototype are bound to the receiver.
    /// A miss reads as null.
    fn op_readmember(&mut self, target: Value, sym: Symbol) {
        let r = match target.as_heap_ref() {
            Some(r) => r,
            None => {
                let got = target.immediate_type_name();
                self.throw_message(&format!("Cannot read member of type {}", got));
                return;
            }
        };

        // Extract before acting: the heap borrow must end before any
        // push or throw.
        let lookup = match self.heap.get(r) {
            HeapObject::Object(o) => Ok((o.container.get(&sym).copied(), o.klass, true)),
            HeapObject::Class(_) => Ok((None, target, false)),
            other => Err(other.type_name()),
        };

        match lookup {
            Err(got) => {
                self.throw_message(&format!("Cannot read member of type {}", got));
            }
            Ok((Some(own), _, _)) => self.push_stack(own),
            Ok((None, chain, bind_receiver)) => {
                match self.prototype_lookup(chain, sym) {
                    Some(found) => {
                        let value = if bind_receiver {
                            self.bind_method(found, target)
                        } else {
                            found
                        };
                        self.push_stack(value);
                    }
                    None => self.push_stack(Value::NULL),
                }
            }
        }
    }

    /// Walk a class chain looking for `sym` in each prototype.
    fn prototype_lookup(&self, mut klass: Value, sym: Symbol) -> Option<Value> {
        loop {
            let r = klass.as_heap_ref()?;
            let class = match self.heap.get(r) {
                HeapObject::Class(c) => c,
                _ => return None,
            };
            if let Some(proto) = class.prototype {
                if let HeapObject::Object(p) = self.heap.get(proto) {
                    if let Some(&value) = p.container.get(&sym) {
                        return Some(value);
                    }
                }
            }
            klass = class.parent_class?;
        }
    }

    /// Bind a prototype method to its receiver. Non-functions pass
    /// through unchanged.
    fn bind_method(&mut self, method: Value, receiver: Value) -> Value {
        let func = match method.as_heap_ref().map(|r| self.heap.get(r)) {
            Some(HeapObject::Function(f)) => f.clone(),
            _ => return method,
        };
        let rooted = self.temp_roots.len();
        self.temp_roots.push(method);
        self.temp_roots.push(receiver);
        let bound = self.alloc_value(HeapObject::Function(Function {
            bound_self: Some(receiver),
            ..func
        }));
        self.temp_roots.truncate(rooted);
        bound
    }

    fn op_putclass(
        &mut self,
        name: u16,
        propertycount: u8,
        methodcount: u8,
        has_constructor: bool,
        has_parent: bool,
    ) -> VmResult<()> {
        let sym = self.constant_symbol(name)?;
        let total = propertycount as usize
            + methodcount as usize
            + has_constructor as usize
            + has_parent as usize;
        // Push order: [parent?] [properties...] [methods...] [ctor?]
        let mut popped = self.pop_n(total)?;

        let constructor = if has_constructor { popped.pop() } else { None };
        let methods: Vec<Value> = popped.split_off(popped.len() - methodcount as usize);
        let properties: Vec<Value> = popped.split_off(popped.len() - propertycount as usize);
        let parent_class = if has_parent { popped.pop() } else { None };

        let mut member_properties = Vec::with_capacity(properties.len());
        for property in &properties {
            match property.as_symbol() {
                Some(p) => member_properties.push(p),
                None => {
                    let got = self.heap.type_name_of(*property);
                    self.throw_message(&format!(
                        "Class member properties must be symbols, got {}",
                        got
                    ));
                    return Ok(());
                }
            }
        }

        let mut prototype_container = FxHashMap::default();
        for method in &methods {
            let method_name = match method.as_heap_ref().map(|r| self.heap.get(r)) {
                Some(HeapObject::Function(f)) => f.name,
                _ => {
                    let got = self.heap.type_name_of(*method);
                    self.throw_message(&format!("Class methods must be functions, got {}", got));
                    return Ok(());
                }
            };
            prototype_container.insert(method_name, *method);
        }

        if let Some(parent) = parent_class {
            if !matches!(
                parent.as_heap_ref().map(|r| self.heap.get(r)),
                Some(HeapObject::Class(_))
            ) {
                let got = self.heap.type_name_of(parent);
                self.throw_message(&format!("Parent of class must be a class, got {}", got));
                return Ok(());
            }
        }
        if let Some(ctor) = constructor {
            if !matches!(
                ctor.as_heap_ref().map(|r| self.heap.get(r)),
                Some(HeapObject::Function(_))
            ) {
                let got = self.heap.type_name_of(ctor);
                self.throw_message(&format!(
                    "Class constructor must be a function, got {}",
                    got
                ));
                return Ok(());
            }
        }

        let rooted = self.temp_roots.len();
        self.temp_roots.extend_from_slice(&methods);
        self.temp_roots.extend(constructor);
        self.temp_roots.extend(parent_class);

        let prototype = self.alloc_value(HeapObject::Object(Object {
            klass: Value::NULL,
            container: prototype_container,
        }));
        self.temp_roots.push(prototype);

        let class_value = self.alloc_value(HeapObject::Class(Class {
            name: sym,
            constructor,
            member_properties,
            prototype: prototype.as_heap_ref(),
            parent_class,
        }));
        self.temp_roots.truncate(rooted);

        self.push_stack(class_value);
        Ok(())
    }
}
