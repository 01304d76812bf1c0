use crate::class_loader::ClassLoader;
use crate::descriptor::Descriptor;
use crate::heap::{HeapEntry, ObjectInstance, VmMemory};
use crate::method_overrides::MethodOverrides;
use crate::opcode::*;
use crate::operand_stack::OperandStack;
use crate::value::{HeapAddr, Value, ValueType};
use crate::vm_error::{InvokeResult, MethodCallError, VmError, VmExecResult};
use classfile::access_flags::MethodAccessFlags;
use classfile::class_file::{ClassFile, MethodReference};
use classfile::constant_pool::ConstantPoolEntry;
use classfile::method_info::MethodInfo;
use indexmap::IndexMap;
use log::{debug, info, trace, warn};
use std::collections::HashSet;
use std::rc::Rc;

/// Locals and operand stack of one activation.
struct Frame {
    locals: Vec<Value>,
    stack: OperandStack,
}

macro_rules! binary_op {
    ($frame:expr, $variant:ident, $accessor:ident, $apply:expr) => {{
        let v2 = $frame.stack.pop()?.$accessor()?;
        let v1 = $frame.stack.pop()?.$accessor()?;
        $frame.stack.push(Value::$variant($apply(v1, v2)))?;
    }};
}

macro_rules! checked_div_op {
    ($frame:expr, $variant:ident, $accessor:ident, $apply:ident) => {{
        let v2 = $frame.stack.pop()?.$accessor()?;
        let v1 = $frame.stack.pop()?.$accessor()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero.into());
        }
        $frame.stack.push(Value::$variant(v1.$apply(v2)))?;
    }};
}

macro_rules! unary_op {
    ($frame:expr, $variant:ident, $accessor:ident, $apply:expr) => {{
        let v = $frame.stack.pop()?.$accessor()?;
        $frame.stack.push(Value::$variant($apply(v)))?;
    }};
}

fn fetch_u8(code: &[u8], at: usize) -> VmExecResult<u8> {
    code.get(at)
        .copied()
        .ok_or_else(|| VmError::ExecuteCodeError(format!("truncated instruction at {}", at)))
}

fn fetch_i8(code: &[u8], at: usize) -> VmExecResult<i8> {
    fetch_u8(code, at).map(|v| v as i8)
}

fn fetch_u16(code: &[u8], at: usize) -> VmExecResult<u16> {
    Ok(u16::from_be_bytes([fetch_u8(code, at)?, fetch_u8(code, at + 1)?]))
}

fn fetch_i16(code: &[u8], at: usize) -> VmExecResult<i16> {
    fetch_u16(code, at).map(|v| v as i16)
}

fn fetch_i32(code: &[u8], at: usize) -> VmExecResult<i32> {
    Ok(i32::from_be_bytes([
        fetch_u8(code, at)?,
        fetch_u8(code, at + 1)?,
        fetch_u8(code, at + 2)?,
        fetch_u8(code, at + 3)?,
    ]))
}

/// Branch offsets are relative to the first byte of the branching
/// instruction.
fn branch_target(pc: usize, offset: i32) -> usize {
    (pc as i64 + offset as i64) as usize
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

/// The execution engine. Owns the loader, the heap and the override
/// registry; one instance runs one guest program on the host thread.
pub struct Interpreter {
    class_loader: ClassLoader,
    memory: VmMemory,
    overrides: MethodOverrides,
    initialized_classes: HashSet<String>,
    instruction_count: u64,
    call_depth: usize,
    main_thread: Value,
}

impl Default for Interpreter {
    fn default() -> Interpreter {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter {
            class_loader: ClassLoader::new(),
            memory: VmMemory::new(),
            overrides: MethodOverrides::with_defaults(),
            initialized_classes: HashSet::new(),
            instruction_count: 0,
            call_depth: 0,
            main_thread: Value::Null,
        }
    }

    pub fn class_loader(&self) -> &ClassLoader {
        &self.class_loader
    }

    pub fn class_loader_mut(&mut self) -> &mut ClassLoader {
        &mut self.class_loader
    }

    pub fn memory(&self) -> &VmMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut VmMemory {
        &mut self.memory
    }

    pub fn overrides_mut(&mut self) -> &mut MethodOverrides {
        &mut self.overrides
    }

    pub fn main_thread(&self) -> Value {
        self.main_thread
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Loads a class file from disk and runs its `main` method.
    pub fn execute_file(&mut self, path: &str) -> InvokeResult {
        let class = self.class_loader.load_by_file(path)?;
        self.execute_main(&class)
    }

    /// Bootstraps the core runtime classes, then invokes
    /// `main([Ljava/lang/String;)V` with an empty argument array.
    pub fn execute_main(&mut self, class: &Rc<ClassFile>) -> InvokeResult {
        let main = class
            .main_method()
            .cloned()
            .ok_or_else(|| VmError::MethodNotFoundException(format!("{}.main", class.name())))?;
        if self.class_loader.get(class.name()).is_none() {
            self.class_loader.register(class.clone());
        }

        info!("bootstrapping runtime classes");
        self.find_initialized_class("java/nio/charset/StandardCharsets")?;
        let system_class = self.find_initialized_class("java/lang/System")?;
        self.create_main_thread()?;
        let initializer = system_class
            .method_with_name("initializeSystemClass", MethodAccessFlags::STATIC)
            .cloned()
            .ok_or_else(|| {
                VmError::MethodNotFoundException("java/lang/System.initializeSystemClass".to_string())
            })?;
        self.execute_method(&system_class, &initializer, Vec::new())?;
        self.find_initialized_class("java/lang/String")?;

        info!("invoking {}.main", class.name());
        let class = self.find_initialized_class(class.name())?;
        let arguments = self.memory.allocate_object_array(0, "java/lang/String");
        let result = self.execute_method(&class, &main, vec![arguments]);
        debug!("executed {} instructions", self.instruction_count);
        result
    }

    /// Runs a named static method without the `main` bootstrap. Intended
    /// for driving isolated guest code, primarily in tests.
    pub fn call_static(
        &mut self,
        class_name: &str,
        method_name: &str,
        arguments: Vec<Value>,
    ) -> InvokeResult {
        let class = self.find_initialized_class(class_name)?;
        let method = class
            .method_with_name(method_name, MethodAccessFlags::STATIC)
            .cloned()
            .ok_or_else(|| {
                VmError::MethodNotFoundException(format!("{}.{}", class_name, method_name))
            })?;
        self.execute_method(&class, &method, arguments)
    }

    /// Invokes one method. Checks the override registry first, then falls
    /// back to interpreting the method's Code attribute. Native methods
    /// without an override yield the default value of their return type.
    pub fn execute_method(
        &mut self,
        class: &Rc<ClassFile>,
        method: &MethodInfo,
        arguments: Vec<Value>,
    ) -> InvokeResult {
        let method_name = class.method_name(method)?;
        let descriptor = class.method_descriptor(method)?;
        trace!(
            "{}invoke {}.{}{}",
            indent(self.call_depth),
            class.name(),
            method_name,
            descriptor
        );

        if let Some(override_fn) = self.overrides.find(class.name(), &method_name, &descriptor) {
            debug!("{}override for {}.{}", indent(self.call_depth), class.name(), method_name);
            self.call_depth += 1;
            let result = override_fn(self, arguments);
            self.call_depth -= 1;
            return result;
        }

        if method.is_native() {
            let parsed = Descriptor::parse(&descriptor)?;
            debug!(
                "native method {}.{}{} has no override, returning a default value",
                class.name(),
                method_name,
                descriptor
            );
            return Ok(Value::default_of(parsed.return_type()));
        }

        let code = class.code_for_method(method)?;
        let mut frame = Frame {
            stack: OperandStack::new(code.max_stack as usize),
            locals: arguments,
        };
        if frame.locals.len() < code.max_locals as usize {
            frame.locals.resize(code.max_locals as usize, Value::None);
        }
        if !method.is_static() {
            // receiver sanity check before the first instruction runs
            frame
                .locals
                .first()
                .copied()
                .unwrap_or(Value::None)
                .as_object()?;
        }

        self.call_depth += 1;
        let result = self.run(class, &code.code, &mut frame);
        self.call_depth -= 1;
        trace!(
            "{}exit {}.{}, {} instructions so far",
            indent(self.call_depth),
            class.name(),
            method_name,
            self.instruction_count
        );
        result
    }

    fn run(&mut self, class: &Rc<ClassFile>, code: &[u8], frame: &mut Frame) -> InvokeResult {
        let mut pc: usize = 0;
        loop {
            let op = fetch_u8(code, pc)?;
            self.instruction_count += 1;
            trace!("{}pc={} op={:#04x}", indent(self.call_depth), pc, op);
            let mut next_pc = pc + 1;

            match op {
                NOP => {}
                ACONST_NULL => frame.stack.push(Value::Null)?,
                ICONST_M1..=ICONST_5 => {
                    frame.stack.push(Value::Int(op as i32 - ICONST_0 as i32))?
                }
                LCONST_0 | LCONST_1 => {
                    frame.stack.push(Value::Long((op - LCONST_0) as i64))?
                }
                FCONST_0 | FCONST_1 | FCONST_2 => {
                    frame.stack.push(Value::Float((op - FCONST_0) as f32))?
                }
                DCONST_0 | DCONST_1 => {
                    frame.stack.push(Value::Double((op - DCONST_0) as f64))?
                }
                BIPUSH => {
                    frame.stack.push(Value::Int(fetch_i8(code, pc + 1)? as i32))?;
                    next_pc = pc + 2;
                }
                SIPUSH => {
                    frame.stack.push(Value::Short(fetch_i16(code, pc + 1)? as i32))?;
                    next_pc = pc + 3;
                }
                LDC => {
                    let index = fetch_u8(code, pc + 1)? as u16;
                    let value = self.load_constant(class, index)?;
                    frame.stack.push(value)?;
                    next_pc = pc + 2;
                }
                LDC_W => {
                    let index = fetch_u16(code, pc + 1)?;
                    let value = self.load_constant(class, index)?;
                    frame.stack.push(value)?;
                    next_pc = pc + 3;
                }
                LDC2_W => {
                    let index = fetch_u16(code, pc + 1)?;
                    let value = self.load_wide_constant(class, index)?;
                    frame.stack.push(value)?;
                    next_pc = pc + 3;
                }

                ILOAD..=ALOAD => {
                    let index = fetch_u8(code, pc + 1)? as usize;
                    Self::load_local(frame, index, op == ALOAD)?;
                    next_pc = pc + 2;
                }
                ILOAD_0..=ALOAD_3 => {
                    let relative = (op - ILOAD_0) as usize;
                    Self::load_local(frame, relative % 4, relative / 4 == 4)?;
                }

                IALOAD..=SALOAD => {
                    let index = frame.stack.pop()?.as_int()?;
                    let array_ref = frame.stack.pop()?.as_array()?;
                    let value = self.memory.array(array_ref)?.get(index)?;
                    frame.stack.push(value)?;
                }

                ISTORE..=ASTORE => {
                    let index = fetch_u8(code, pc + 1)? as usize;
                    let value = frame.stack.pop()?;
                    Self::store_local(frame, index, value);
                    next_pc = pc + 2;
                }
                ISTORE_0..=ASTORE_3 => {
                    let value = frame.stack.pop()?;
                    Self::store_local(frame, (op - ISTORE_0) as usize % 4, value);
                }

                IASTORE..=SASTORE => {
                    let value = frame.stack.pop()?;
                    let index = frame.stack.pop()?.as_int()?;
                    let array_ref = frame.stack.pop()?.as_array()?;
                    let stored = self.array_store_value(array_ref, op, value)?;
                    self.memory.array_mut(array_ref)?.set(index, stored)?;
                }

                POP => {
                    frame.stack.pop()?;
                }
                POP2 => frame.stack.pop2()?,
                DUP => frame.stack.dup()?,
                DUP_X1 => frame.stack.dup_x1()?,
                DUP2 => frame.stack.dup2()?,
                SWAP => frame.stack.swap()?,

                IADD => binary_op!(frame, Int, as_int, |a: i32, b: i32| a.wrapping_add(b)),
                LADD => binary_op!(frame, Long, as_long, |a: i64, b: i64| a.wrapping_add(b)),
                FADD => binary_op!(frame, Float, as_float, |a: f32, b: f32| a + b),
                DADD => binary_op!(frame, Double, as_double, |a: f64, b: f64| a + b),
                ISUB => binary_op!(frame, Int, as_int, |a: i32, b: i32| a.wrapping_sub(b)),
                LSUB => binary_op!(frame, Long, as_long, |a: i64, b: i64| a.wrapping_sub(b)),
                FSUB => binary_op!(frame, Float, as_float, |a: f32, b: f32| a - b),
                DSUB => binary_op!(frame, Double, as_double, |a: f64, b: f64| a - b),
                IMUL => binary_op!(frame, Int, as_int, |a: i32, b: i32| a.wrapping_mul(b)),
                LMUL => binary_op!(frame, Long, as_long, |a: i64, b: i64| a.wrapping_mul(b)),
                FMUL => binary_op!(frame, Float, as_float, |a: f32, b: f32| a * b),
                DMUL => binary_op!(frame, Double, as_double, |a: f64, b: f64| a * b),
                IDIV => checked_div_op!(frame, Int, as_int, wrapping_div),
                LDIV => checked_div_op!(frame, Long, as_long, wrapping_div),
                FDIV => binary_op!(frame, Float, as_float, |a: f32, b: f32| a / b),
                DDIV => binary_op!(frame, Double, as_double, |a: f64, b: f64| a / b),
                IREM => checked_div_op!(frame, Int, as_int, wrapping_rem),
                LREM => checked_div_op!(frame, Long, as_long, wrapping_rem),
                FREM => binary_op!(frame, Float, as_float, |a: f32, b: f32| a % b),
                DREM => binary_op!(frame, Double, as_double, |a: f64, b: f64| a % b),
                INEG => unary_op!(frame, Int, as_int, |v: i32| v.wrapping_neg()),
                LNEG => unary_op!(frame, Long, as_long, |v: i64| v.wrapping_neg()),
                FNEG => unary_op!(frame, Float, as_float, |v: f32| -v),
                DNEG => unary_op!(frame, Double, as_double, |v: f64| -v),

                ISHL => binary_op!(frame, Int, as_int, |a: i32, b: i32| a
                    .wrapping_shl((b & 0x3f) as u32)),
                ISHR => binary_op!(frame, Int, as_int, |a: i32, b: i32| a
                    .wrapping_shr((b & 0x3f) as u32)),
                IUSHR => binary_op!(frame, Int, as_int, |a: i32, b: i32| ((a as u32)
                    .wrapping_shr((b & 0x3f) as u32))
                    as i32),
                LSHL | LSHR | LUSHR => {
                    let shift = (frame.stack.pop()?.as_int()? & 0x3f) as u32;
                    let value = frame.stack.pop()?.as_long()?;
                    let result = match op {
                        LSHL => value.wrapping_shl(shift),
                        LSHR => value.wrapping_shr(shift),
                        _ => ((value as u64).wrapping_shr(shift)) as i64,
                    };
                    frame.stack.push(Value::Long(result))?;
                }

                IAND => binary_op!(frame, Int, as_int, |a: i32, b: i32| a & b),
                LAND => binary_op!(frame, Long, as_long, |a: i64, b: i64| a & b),
                IOR => binary_op!(frame, Int, as_int, |a: i32, b: i32| a | b),
                LOR => binary_op!(frame, Long, as_long, |a: i64, b: i64| a | b),
                IXOR => binary_op!(frame, Int, as_int, |a: i32, b: i32| a ^ b),
                LXOR => binary_op!(frame, Long, as_long, |a: i64, b: i64| a ^ b),

                IINC => {
                    let index = fetch_u8(code, pc + 1)? as usize;
                    let increment = fetch_i8(code, pc + 2)? as i32;
                    let current = frame
                        .locals
                        .get(index)
                        .copied()
                        .unwrap_or(Value::None)
                        .as_int()?;
                    Self::store_local(frame, index, Value::Int(current.wrapping_add(increment)));
                    next_pc = pc + 3;
                }

                I2L => unary_op!(frame, Long, as_int, |v: i32| v as i64),
                I2F => unary_op!(frame, Float, as_int, |v: i32| v as f32),
                I2D => unary_op!(frame, Double, as_int, |v: i32| v as f64),
                L2I => unary_op!(frame, Int, as_long, |v: i64| v as i32),
                L2F => unary_op!(frame, Float, as_long, |v: i64| v as f32),
                L2D => unary_op!(frame, Double, as_long, |v: i64| v as f64),
                F2I => unary_op!(frame, Int, as_float, |v: f32| v as i32),
                F2L => unary_op!(frame, Long, as_float, |v: f32| v as i64),
                F2D => unary_op!(frame, Double, as_float, |v: f32| v as f64),
                D2I => unary_op!(frame, Int, as_double, |v: f64| v as i32),
                D2L => unary_op!(frame, Long, as_double, |v: f64| v as i64),
                D2F => unary_op!(frame, Float, as_double, |v: f64| v as f32),
                I2B => unary_op!(frame, Byte, as_int, |v: i32| (v as i8) as i32),
                I2C => unary_op!(frame, Char, as_int, |v: i32| (v as u16) as i32),
                I2S => unary_op!(frame, Short, as_int, |v: i32| (v as i16) as i32),

                LCMP => {
                    let v2 = frame.stack.pop()?.as_long()?;
                    let v1 = frame.stack.pop()?.as_long()?;
                    frame.stack.push(Value::Int(compare(v1, v2)))?;
                }
                FCMPL | FCMPG => {
                    let v2 = frame.stack.pop()?.as_float()?;
                    let v1 = frame.stack.pop()?.as_float()?;
                    let result = if v1.is_nan() || v2.is_nan() {
                        if op == FCMPG {
                            1
                        } else {
                            -1
                        }
                    } else {
                        compare(v1, v2)
                    };
                    frame.stack.push(Value::Int(result))?;
                }
                DCMPL | DCMPG => {
                    let v2 = frame.stack.pop()?.as_double()?;
                    let v1 = frame.stack.pop()?.as_double()?;
                    let result = if v1.is_nan() || v2.is_nan() {
                        if op == DCMPG {
                            1
                        } else {
                            -1
                        }
                    } else {
                        compare(v1, v2)
                    };
                    frame.stack.push(Value::Int(result))?;
                }

                IFEQ..=IFLE => {
                    let offset = fetch_i16(code, pc + 1)?;
                    let value = frame.stack.pop()?.as_int()?;
                    let jump = match op {
                        IFEQ => value == 0,
                        IFNE => value != 0,
                        IFLT => value < 0,
                        IFGE => value >= 0,
                        IFGT => value > 0,
                        _ => value <= 0,
                    };
                    next_pc = if jump {
                        branch_target(pc, offset as i32)
                    } else {
                        pc + 3
                    };
                }
                IF_ICMPEQ..=IF_ICMPLE => {
                    let offset = fetch_i16(code, pc + 1)?;
                    let v2 = frame.stack.pop()?.as_int()?;
                    let v1 = frame.stack.pop()?.as_int()?;
                    let jump = match op {
                        IF_ICMPEQ => v1 == v2,
                        IF_ICMPNE => v1 != v2,
                        IF_ICMPLT => v1 < v2,
                        IF_ICMPGE => v1 >= v2,
                        IF_ICMPGT => v1 > v2,
                        _ => v1 <= v2,
                    };
                    next_pc = if jump {
                        branch_target(pc, offset as i32)
                    } else {
                        pc + 3
                    };
                }
                IF_ACMPEQ | IF_ACMPNE => {
                    let offset = fetch_i16(code, pc + 1)?;
                    let v2 = frame.stack.pop()?.as_reference()?;
                    let v1 = frame.stack.pop()?.as_reference()?;
                    let jump = if op == IF_ACMPEQ { v1 == v2 } else { v1 != v2 };
                    next_pc = if jump {
                        branch_target(pc, offset as i32)
                    } else {
                        pc + 3
                    };
                }
                GOTO => {
                    let offset = fetch_i16(code, pc + 1)?;
                    next_pc = branch_target(pc, offset as i32);
                }
                IFNULL | IFNONNULL => {
                    let offset = fetch_i16(code, pc + 1)?;
                    let reference = frame.stack.pop()?.as_reference()?;
                    let jump = if op == IFNULL {
                        reference.is_none()
                    } else {
                        reference.is_some()
                    };
                    next_pc = if jump {
                        branch_target(pc, offset as i32)
                    } else {
                        pc + 3
                    };
                }
                LOOKUPSWITCH => {
                    next_pc = self.lookup_switch(code, pc, frame)?;
                }

                GETSTATIC => {
                    let index = fetch_u16(code, pc + 1)?;
                    let reference = class.find_field_ref(index)?;
                    self.find_initialized_class(&reference.class_name)?;
                    let value = self
                        .memory
                        .get_global(&reference.class_name, &reference.field_name)?;
                    frame.stack.push(value)?;
                    next_pc = pc + 3;
                }
                PUTSTATIC => {
                    let index = fetch_u16(code, pc + 1)?;
                    let reference = class.find_field_ref(index)?;
                    self.find_initialized_class(&reference.class_name)?;
                    let value = frame.stack.pop()?;
                    self.memory
                        .put_global(&reference.class_name, &reference.field_name, value)?;
                    next_pc = pc + 3;
                }
                GETFIELD => {
                    let index = fetch_u16(code, pc + 1)?;
                    let reference = class.find_field_ref(index)?;
                    let addr = frame.stack.pop()?.as_object()?;
                    let value = self
                        .memory
                        .object(addr)?
                        .field(&reference.class_name, &reference.field_name)
                        .copied()
                        .ok_or_else(|| {
                            VmError::FieldNotFoundException(format!(
                                "{}::{}",
                                reference.class_name, reference.field_name
                            ))
                        })?;
                    frame.stack.push(value)?;
                    next_pc = pc + 3;
                }
                PUTFIELD => {
                    let index = fetch_u16(code, pc + 1)?;
                    let reference = class.find_field_ref(index)?;
                    let value = frame.stack.pop()?;
                    let addr = frame.stack.pop()?.as_object()?;
                    let slot = self
                        .memory
                        .object_mut(addr)?
                        .field_mut(&reference.class_name, &reference.field_name)
                        .ok_or_else(|| {
                            VmError::FieldNotFoundException(format!(
                                "{}::{}",
                                reference.class_name, reference.field_name
                            ))
                        })?;
                    *slot = value;
                    next_pc = pc + 3;
                }

                INVOKEVIRTUAL => {
                    let index = fetch_u16(code, pc + 1)?;
                    let reference = class.find_method(index)?;
                    self.invoke_virtual(frame, &reference)?;
                    next_pc = pc + 3;
                }
                INVOKEINTERFACE => {
                    let index = fetch_u16(code, pc + 1)?;
                    // count and padding bytes follow the index; both are
                    // redundant with the descriptor
                    let reference = class.find_interface_method(index)?;
                    self.invoke_virtual(frame, &reference)?;
                    next_pc = pc + 5;
                }
                INVOKESPECIAL => {
                    let index = fetch_u16(code, pc + 1)?;
                    let reference = class.find_method(index)?;
                    self.invoke_resolved(frame, &reference)?;
                    next_pc = pc + 3;
                }
                INVOKESTATIC => {
                    let index = fetch_u16(code, pc + 1)?;
                    let reference = class.find_method(index)?;
                    self.invoke_resolved(frame, &reference)?;
                    next_pc = pc + 3;
                }

                NEW => {
                    let index = fetch_u16(code, pc + 1)?;
                    let class_name = class.find_class(index)?;
                    let new_class = self.find_initialized_class(&class_name)?;
                    let instance = self.new_object(&new_class)?;
                    frame.stack.push(instance)?;
                    next_pc = pc + 3;
                }
                NEWARRAY => {
                    let type_code = fetch_u8(code, pc + 1)?;
                    let element_type = ValueType::from_array_type_code(type_code)?;
                    let length = frame.stack.pop()?.as_int()?;
                    if length < 0 {
                        return Err(
                            VmError::ExecuteCodeError(format!("negative array size {}", length))
                                .into(),
                        );
                    }
                    let array = self.memory.allocate_array(element_type, length as usize);
                    frame.stack.push(array)?;
                    next_pc = pc + 2;
                }
                ANEWARRAY => {
                    let index = fetch_u16(code, pc + 1)?;
                    let class_name = class.find_class(index)?;
                    let length = frame.stack.pop()?.as_int()?;
                    if length < 0 {
                        return Err(
                            VmError::ExecuteCodeError(format!("negative array size {}", length))
                                .into(),
                        );
                    }
                    let array = self
                        .memory
                        .allocate_object_array(length as usize, &class_name);
                    frame.stack.push(array)?;
                    next_pc = pc + 3;
                }
                ARRAYLENGTH => {
                    let addr = frame.stack.pop()?.as_array()?;
                    let length = self.memory.array(addr)?.len();
                    frame.stack.push(Value::Int(length as i32))?;
                }

                INSTANCEOF => {
                    let index = fetch_u16(code, pc + 1)?;
                    let target = class.find_class(index)?;
                    let value = frame.stack.pop()?;
                    let matched = self.reference_is_instance_of(value, &target)?;
                    frame.stack.push(Value::Int(matched as i32))?;
                    next_pc = pc + 3;
                }
                CHECKCAST => {
                    let index = fetch_u16(code, pc + 1)?;
                    let target = class.find_class(index)?;
                    if !target.starts_with('[') {
                        // resolving the target runs its static initializer
                        self.find_initialized_class(&target)?;
                    }
                    let value = frame.stack.top()?;
                    if !value.is_null() && !self.reference_is_instance_of(value, &target)? {
                        // no exception tables yet, so a failed cast is
                        // reported and execution continues
                        warn!("checkcast to {} not proven for {:?}", target, value);
                    }
                    next_pc = pc + 3;
                }

                ATHROW => {
                    let value = frame.stack.pop()?;
                    value.as_object()?;
                    return Err(MethodCallError::ExceptionThrown(value));
                }
                MONITORENTER | MONITOREXIT => {
                    // single-threaded execution, monitors are a no-op;
                    // any reference can be synchronized on, arrays included
                    frame.stack.pop()?.as_reference()?;
                }

                RETURN => return Ok(Value::None),
                IRETURN => {
                    let value = frame.stack.pop()?;
                    if !value.is_stored_as_integer() {
                        return Err(VmError::TypeMismatch {
                            expected: ValueType::Integer,
                            found: value.value_type(),
                        }
                        .into());
                    }
                    return Ok(value);
                }
                LRETURN => {
                    let value = frame.stack.pop()?;
                    value.as_long()?;
                    return Ok(value);
                }
                FRETURN => {
                    let value = frame.stack.pop()?;
                    value.as_float()?;
                    return Ok(value);
                }
                DRETURN => {
                    let value = frame.stack.pop()?;
                    value.as_double()?;
                    return Ok(value);
                }
                ARETURN => {
                    let value = frame.stack.pop()?;
                    value.as_reference()?;
                    return Ok(value);
                }

                other => return Err(VmError::UnsupportedInstruction(other).into()),
            }

            pc = next_pc;
        }
    }

    fn load_local(frame: &mut Frame, index: usize, is_reference: bool) -> VmExecResult<()> {
        let value = frame.locals.get(index).copied().unwrap_or(Value::None);
        // uninitialized reference slots read as null
        let value = if value == Value::None && is_reference {
            Value::Null
        } else {
            value
        };
        frame.stack.push(value)
    }

    fn store_local(frame: &mut Frame, index: usize, value: Value) {
        if index >= frame.locals.len() {
            warn!(
                "local store at {} beyond declared max locals {}",
                index,
                frame.locals.len()
            );
            frame.locals.resize(index + 1, Value::None);
        }
        frame.locals[index] = value;
    }

    /// Narrows the popped value to the element representation the store
    /// instruction implies.
    fn array_store_value(
        &self,
        array_ref: HeapAddr,
        op: u8,
        value: Value,
    ) -> Result<Value, MethodCallError> {
        Ok(match op {
            IASTORE => Value::Int(value.as_int()?),
            LASTORE => Value::Long(value.as_long()?),
            FASTORE => Value::Float(value.as_float()?),
            DASTORE => Value::Double(value.as_double()?),
            BASTORE => Value::Byte((value.as_int()? as i8) as i32),
            CASTORE => Value::Char((value.as_int()? as u16) as i32),
            SASTORE => Value::Short((value.as_int()? as i16) as i32),
            _ => {
                let array = self.memory.array(array_ref)?;
                if value.memory_type() != array.memory_type() {
                    return Err(VmError::TypeMismatch {
                        expected: array.memory_type(),
                        found: value.memory_type(),
                    }
                    .into());
                }
                value
            }
        })
    }

    /// The match cursor starts right after the opcode and is padded to the
    /// next 4-byte boundary measured from the start of the code array.
    fn lookup_switch(&self, code: &[u8], pc: usize, frame: &mut Frame) -> Result<usize, MethodCallError> {
        let key = frame.stack.pop()?.as_int()?;
        let mut cursor = pc + 1;
        cursor += (4 - cursor % 4) % 4;
        let default_offset = fetch_i32(code, cursor)?;
        let npairs = fetch_i32(code, cursor + 4)?;
        cursor += 8;
        for _ in 0..npairs {
            let match_key = fetch_i32(code, cursor)?;
            let offset = fetch_i32(code, cursor + 4)?;
            if match_key == key {
                return Ok(branch_target(pc, offset));
            }
            cursor += 8;
        }
        Ok(branch_target(pc, default_offset))
    }

    fn load_constant(&mut self, class: &Rc<ClassFile>, index: u16) -> InvokeResult {
        match class.constant_pool.entry(index)? {
            ConstantPoolEntry::Integer(v) => Ok(Value::Int(*v)),
            ConstantPoolEntry::Float(v) => Ok(Value::Float(*v)),
            ConstantPoolEntry::StringReference(utf8_index) => {
                let text = class.constant_pool.utf8(*utf8_index)?;
                self.new_string(&text)
            }
            ConstantPoolEntry::ClassReference(name_index) => {
                let class_name = class.constant_pool.utf8(*name_index)?;
                self.class_by_name(&class_name)
            }
            _ => Err(VmError::UnexpectedConstant(index).into()),
        }
    }

    fn load_wide_constant(&mut self, class: &Rc<ClassFile>, index: u16) -> InvokeResult {
        match class.constant_pool.entry(index)? {
            ConstantPoolEntry::Long(v) => Ok(Value::Long(*v)),
            ConstantPoolEntry::Double(v) => Ok(Value::Double(*v)),
            _ => Err(VmError::UnexpectedConstant(index).into()),
        }
    }

    fn invoke_virtual(
        &mut self,
        frame: &mut Frame,
        reference: &MethodReference,
    ) -> Result<(), MethodCallError> {
        let descriptor = Descriptor::parse(&reference.descriptor)?;
        let receiver = frame.stack.peek(descriptor.argument_count())?;
        let (target_class, target_method) = self.virtual_method_dispatch(reference, receiver)?;
        let arguments = frame.stack.pop_n(descriptor.argument_count() + 1)?;
        let result = self.execute_method(&target_class, &target_method, arguments)?;
        Self::handle_return(frame, result, &descriptor)
    }

    /// invokespecial and invokestatic both bind to the method declared by
    /// the class the constant pool names.
    fn invoke_resolved(
        &mut self,
        frame: &mut Frame,
        reference: &MethodReference,
    ) -> Result<(), MethodCallError> {
        let descriptor = Descriptor::parse(&reference.descriptor)?;
        let target_class = self.find_initialized_class(&reference.class_name)?;
        let target_method = target_class
            .method_with_signature(&reference.method_name, &reference.descriptor)
            .cloned()
            .ok_or_else(|| {
                VmError::MethodNotFoundException(format!(
                    "{}.{}{}",
                    reference.class_name, reference.method_name, reference.descriptor
                ))
            })?;
        let argument_slots =
            descriptor.argument_count() + if target_method.is_static() { 0 } else { 1 };
        let arguments = frame.stack.pop_n(argument_slots)?;
        let result = self.execute_method(&target_class, &target_method, arguments)?;
        Self::handle_return(frame, result, &descriptor)
    }

    /// Walks the receiver's runtime class chain for the named signature.
    pub fn virtual_method_dispatch(
        &mut self,
        reference: &MethodReference,
        receiver: Value,
    ) -> Result<(Rc<ClassFile>, MethodInfo), MethodCallError> {
        let addr = receiver.as_object()?;
        let mut current = self.memory.object(addr)?.class.clone();
        loop {
            if let Some(method) =
                current.method_with_signature(&reference.method_name, &reference.descriptor)
            {
                let method = method.clone();
                return Ok((current, method));
            }
            match current.super_class_name()? {
                Some(super_name) => current = self.find_initialized_class(&super_name)?,
                None => {
                    return Err(VmError::MethodNotFoundException(format!(
                        "{}.{}{}",
                        reference.class_name, reference.method_name, reference.descriptor
                    ))
                    .into())
                }
            }
        }
    }

    /// Checks the callee's declared return type against the produced value
    /// and pushes it for non-void calls.
    fn handle_return(
        frame: &mut Frame,
        value: Value,
        descriptor: &Descriptor,
    ) -> Result<(), MethodCallError> {
        let expected = descriptor.return_type();
        if expected.memory_type() != value.memory_type() {
            return Err(VmError::TypeMismatch {
                expected: expected.memory_type(),
                found: value.memory_type(),
            }
            .into());
        }
        if expected != ValueType::None {
            frame.stack.push(value)?;
        }
        Ok(())
    }

    fn reference_is_instance_of(
        &mut self,
        value: Value,
        target: &str,
    ) -> Result<bool, MethodCallError> {
        let addr = match value.as_reference()? {
            Some(addr) => addr,
            None => return Ok(false),
        };
        let start_class = match self.memory.entry(addr)? {
            HeapEntry::Array(_) => return Ok(target.starts_with('[')),
            HeapEntry::Object(object) => object.class.clone(),
        };
        let mut current = Some(start_class);
        while let Some(class) = current {
            if class.name() == target {
                return Ok(true);
            }
            if class.interface_names()?.iter().any(|name| name == target) {
                return Ok(true);
            }
            current = self.class_loader.super_class_of(&class)?;
        }
        Ok(false)
    }

    /// Loads a class and runs its static initialization exactly once.
    /// Superclasses initialize first; the class is marked initialized
    /// before `<clinit>` runs so self-references in the initializer do not
    /// recurse.
    pub fn find_initialized_class(
        &mut self,
        name: &str,
    ) -> Result<Rc<ClassFile>, MethodCallError> {
        let class = self.class_loader.load_by_name(name)?;
        if self.initialized_classes.contains(name) {
            return Ok(class);
        }
        if let Some(super_name) = class.super_class_name()? {
            self.find_initialized_class(&super_name)?;
        }
        self.prepare_class(&class)?;
        self.init_class(&class)?;
        Ok(class)
    }

    /// Creates the default-valued global slot for every static field.
    fn prepare_class(&mut self, class: &Rc<ClassFile>) -> Result<(), MethodCallError> {
        for field in class.field_summaries()? {
            if !field.is_static {
                continue;
            }
            let parsed = Descriptor::parse(&field.descriptor)?;
            if parsed.is_method() {
                return Err(VmError::InvalidDescriptor(field.descriptor).into());
            }
            self.memory
                .init_global(class.name(), &field.name, parsed.return_type());
        }
        Ok(())
    }

    fn init_class(&mut self, class: &Rc<ClassFile>) -> Result<(), MethodCallError> {
        self.initialized_classes.insert(class.name().to_string());
        if let Some(clinit) = class.clinit().cloned() {
            debug!("running static initializer of {}", class.name());
            self.execute_method(class, &clinit, Vec::new())?;
        }
        Ok(())
    }

    /// Allocates an instance with the default-valued fields of the class
    /// and all of its superclasses. Constructors run separately.
    pub fn new_object(&mut self, class: &Rc<ClassFile>) -> InvokeResult {
        let mut fields = IndexMap::new();
        let mut current = Some(class.clone());
        while let Some(declaring) = current {
            for field in declaring.field_summaries()? {
                if field.is_static {
                    continue;
                }
                let key = if field.is_private {
                    ObjectInstance::private_key(declaring.name(), &field.name)
                } else {
                    field.name.clone()
                };
                let field_type = Descriptor::parse(&field.descriptor)?.return_type();
                fields.entry(key).or_insert(Value::default_of(field_type));
            }
            current = self.class_loader.super_class_of(&declaring)?;
        }
        Ok(self.memory.allocate_object(class.clone(), fields))
    }

    /// Materializes a host string as a guest `java/lang/String` backed by
    /// a UTF-16 char array.
    pub fn new_string(&mut self, content: &str) -> InvokeResult {
        trace!("{}new string {:?}", indent(self.call_depth), content);
        let string_class = self.find_initialized_class("java/lang/String")?;
        let string_ref = self.new_object(&string_class)?;

        let units: Vec<u16> = content.encode_utf16().collect();
        let array_ref = self.memory.allocate_array(ValueType::Char, units.len());
        let array = self.memory.array_mut(array_ref.as_array()?)?;
        for (i, unit) in units.iter().enumerate() {
            array.values[i] = Value::Char(*unit as i32);
        }

        let constructor = string_class
            .method_with_signature("<init>", "([C)V")
            .cloned()
            .ok_or_else(|| {
                VmError::MethodNotFoundException("java/lang/String.<init>([C)V".to_string())
            })?;
        self.execute_method(&string_class, &constructor, vec![string_ref, array_ref])?;
        Ok(string_ref)
    }

    /// A `java/lang/Class` instance carrying its class name in the
    /// synthetic `__name` field.
    pub fn class_by_name(&mut self, class_name: &str) -> InvokeResult {
        let name_string = self.new_string(class_name)?;
        let class_class = self.find_initialized_class("java/lang/Class")?;
        let class_object = self.new_object(&class_class)?;
        self.memory
            .object_mut(class_object.as_object()?)?
            .fields
            .insert("__name".to_string(), name_string);
        Ok(class_object)
    }

    /// Builds the main thread group and thread the way the runtime's own
    /// launcher would, so `Thread.currentThread()` has something to return.
    fn create_main_thread(&mut self) -> Result<(), MethodCallError> {
        let group_class = self.find_initialized_class("java/lang/ThreadGroup")?;
        let group = self.new_object(&group_class)?;
        let group_constructor = group_class
            .method_with_signature("<init>", "()V")
            .cloned()
            .ok_or_else(|| {
                VmError::MethodNotFoundException("java/lang/ThreadGroup.<init>()V".to_string())
            })?;
        self.execute_method(&group_class, &group_constructor, vec![group])?;

        let thread_class = self.find_initialized_class("java/lang/Thread")?;
        let thread = self.new_object(&thread_class)?;
        // the Thread constructor reads the parent thread's priority, but
        // there is no parent yet; force a sane value up front
        if let Some(slot) = self
            .memory
            .object_mut(thread.as_object()?)?
            .field_mut("java/lang/Thread", "priority")
        {
            *slot = Value::Int(5);
        }
        self.main_thread = thread;

        let name = self.new_string("main")?;
        let thread_constructor = thread_class
            .method_with_signature("<init>", "(Ljava/lang/ThreadGroup;Ljava/lang/String;)V")
            .cloned()
            .ok_or_else(|| {
                VmError::MethodNotFoundException(
                    "java/lang/Thread.<init>(ThreadGroup,String)".to_string(),
                )
            })?;
        self.execute_method(&thread_class, &thread_constructor, vec![thread, group, name])?;
        Ok(())
    }
}

fn compare<T: PartialOrd>(v1: T, v2: T) -> i32 {
    if v1 > v2 {
        1
    } else if v1 < v2 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_targets_are_relative_to_the_instruction() {
        assert_eq!(10, branch_target(13, -3));
        assert_eq!(20, branch_target(13, 7));
    }

    #[test]
    fn comparisons_follow_cmp_contract() {
        assert_eq!(1, compare(2i64, 1i64));
        assert_eq!(-1, compare(1.0f64, 2.0f64));
        assert_eq!(0, compare(5i64, 5i64));
    }

    #[test]
    fn fetch_helpers_are_big_endian_and_bounds_checked() {
        let code = [0x12u8, 0x34, 0x56, 0x78];
        assert_eq!(0x1234, fetch_u16(&code, 0).unwrap());
        assert_eq!(0x12345678, fetch_i32(&code, 0).unwrap());
        assert_eq!(-1, fetch_i8(&[0xff], 0).unwrap());
        assert!(fetch_u16(&code, 3).is_err());
    }
}
