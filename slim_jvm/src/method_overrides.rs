use crate::interpreter::Interpreter;
use crate::value::Value;
use crate::vm_error::{InvokeResult, VmError};
use classfile::access_flags::MethodAccessFlags;
use log::{info, warn};
use std::collections::HashMap;
use std::io::Write;

/// Host implementation replacing one guest method. Instance calls receive
/// the receiver as argument 0.
pub type OverrideFn = fn(&mut Interpreter, Vec<Value>) -> InvokeResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OverrideKey {
    class_name: String,
    method_name: String,
    descriptor: String,
}

/// Registry of (class, method, descriptor) -> host behavior, consulted
/// before every dispatch. Built once at interpreter construction.
#[derive(Default)]
pub struct MethodOverrides {
    overrides: HashMap<OverrideKey, OverrideFn>,
}

impl MethodOverrides {
    pub fn new() -> MethodOverrides {
        MethodOverrides::default()
    }

    pub fn with_defaults() -> MethodOverrides {
        let mut overrides = MethodOverrides::new();
        overrides.add_default_overrides();
        overrides
    }

    pub fn add(
        &mut self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        function: OverrideFn,
    ) {
        self.overrides.insert(
            OverrideKey {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
                descriptor: descriptor.to_string(),
            },
            function,
        );
    }

    pub fn find(
        &self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
    ) -> Option<OverrideFn> {
        self.overrides
            .get(&OverrideKey {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
                descriptor: descriptor.to_string(),
            })
            .copied()
    }

    fn add_default_overrides(&mut self) {
        self.add("java/lang/Double", "longBitsToDouble", "(J)D", long_bits_to_double);
        self.add("java/lang/Double", "doubleToRawLongBits", "(D)J", double_to_raw_long_bits);
        self.add("java/lang/Float", "floatToRawIntBits", "(F)I", float_to_raw_int_bits);
        self.add("java/lang/Object", "hashCode", "()I", object_hash_code);
        self.add("java/lang/Object", "getClass", "()Ljava/lang/Class;", object_get_class);
        self.add("java/lang/String", "intern", "()Ljava/lang/String;", string_intern);
        self.add(
            "java/lang/System",
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
            system_arraycopy,
        );
        self.add("java/lang/System", "loadLibrary", "(Ljava/lang/String;)V", system_load_library);
        self.add("java/lang/System", "setOut0", "(Ljava/io/PrintStream;)V", system_set_out0);
        self.add(
            "java/lang/Thread",
            "currentThread",
            "()Ljava/lang/Thread;",
            thread_current_thread,
        );
        self.add(
            "java/lang/Class",
            "desiredAssertionStatus",
            "()Z",
            class_desired_assertion_status,
        );
        self.add(
            "java/lang/Class",
            "forName",
            "(Ljava/lang/String;ZLjava/lang/ClassLoader;)Ljava/lang/Class;",
            class_for_name,
        );
        self.add("java/lang/Class", "newInstance", "()Ljava/lang/Object;", class_new_instance);
        self.add(
            "java/security/AccessController",
            "doPrivileged",
            "(Ljava/security/PrivilegedAction;)Ljava/lang/Object;",
            do_privileged,
        );
        self.add(
            "java/security/AccessController",
            "doPrivileged",
            "(Ljava/security/PrivilegedExceptionAction;)Ljava/lang/Object;",
            do_privileged,
        );
        self.add(
            "java/io/FileOutputStream",
            "writeBytes",
            "([BIIZ)V",
            file_output_stream_write_bytes,
        );
    }
}

fn arg(arguments: &[Value], index: usize) -> Result<Value, VmError> {
    arguments
        .get(index)
        .copied()
        .ok_or_else(|| VmError::ExecuteCodeError(format!("missing bridge argument {}", index)))
}

fn long_bits_to_double(_: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let bits = arg(&arguments, 0)?.as_long()?;
    Ok(Value::Double(f64::from_bits(bits as u64)))
}

fn double_to_raw_long_bits(_: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let value = arg(&arguments, 0)?.as_double()?;
    Ok(Value::Long(value.to_bits() as i64))
}

fn float_to_raw_int_bits(_: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let value = arg(&arguments, 0)?.as_float()?;
    Ok(Value::Int(value.to_bits() as i32))
}

/// Identity hash derived from the heap address; stable for one run.
fn object_hash_code(_: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let addr = arg(&arguments, 0)?.as_object()?;
    Ok(Value::Int(addr.0 as i32))
}

fn object_get_class(interpreter: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let addr = arg(&arguments, 0)?.as_object()?;
    let class_name = interpreter.memory().object(addr)?.class.name().to_string();
    interpreter.class_by_name(&class_name)
}

fn string_intern(_: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    warn!("fake implementation of String.intern");
    Ok(arg(&arguments, 0)?)
}

fn system_arraycopy(interpreter: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let src_addr = arg(&arguments, 0)?.as_array()?;
    let src_pos = arg(&arguments, 1)?.as_int()?;
    let dst_addr = arg(&arguments, 2)?.as_array()?;
    let dst_pos = arg(&arguments, 3)?.as_int()?;
    let length = arg(&arguments, 4)?.as_int()?;

    // span arithmetic in i64, the guest controls both operands
    let copied = {
        let src = interpreter.memory().array(src_addr)?;
        let src_end = src_pos as i64 + length as i64;
        if src_pos < 0 || length < 0 || src_end > src.len() as i64 {
            return Err(VmError::ArrayIndexOutOfBounds {
                index: src_pos.saturating_add(length),
                length: src.len(),
            }
            .into());
        }
        src.values[src_pos as usize..src_end as usize].to_vec()
    };
    let dst = interpreter.memory_mut().array_mut(dst_addr)?;
    let dst_end = dst_pos as i64 + length as i64;
    if dst_pos < 0 || dst_end > dst.len() as i64 {
        return Err(VmError::ArrayIndexOutOfBounds {
            index: dst_pos.saturating_add(length),
            length: dst.len(),
        }
        .into());
    }
    dst.values[dst_pos as usize..dst_end as usize].copy_from_slice(&copied);
    Ok(Value::None)
}

fn system_load_library(interpreter: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let name_addr = arg(&arguments, 0)?.as_object()?;
    let library = interpreter.memory().string_value(name_addr)?;
    info!("skipping load of library {}", library);
    Ok(Value::None)
}

fn system_set_out0(interpreter: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let print_stream = arg(&arguments, 0)?;
    interpreter
        .memory_mut()
        .put_global("java/lang/System", "out", print_stream)?;
    Ok(Value::None)
}

fn thread_current_thread(interpreter: &mut Interpreter, _: Vec<Value>) -> InvokeResult {
    Ok(interpreter.main_thread())
}

fn class_desired_assertion_status(_: &mut Interpreter, _: Vec<Value>) -> InvokeResult {
    Ok(Value::Boolean(1))
}

fn class_for_name(interpreter: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let name_addr = arg(&arguments, 0)?.as_object()?;
    let class_name = interpreter.memory().string_value(name_addr)?.replace('.', "/");
    interpreter.class_by_name(&class_name)
}

fn class_new_instance(interpreter: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let class_object_addr = arg(&arguments, 0)?.as_object()?;
    let name_value = interpreter
        .memory()
        .object(class_object_addr)?
        .fields
        .get("__name")
        .copied()
        .ok_or_else(|| VmError::ExecuteCodeError("Class object has no name".to_string()))?;
    let class_name = interpreter.memory().string_value(name_value.as_object()?)?;

    let class = interpreter.find_initialized_class(&class_name)?;
    let instance = interpreter.new_object(&class)?;
    let constructor = class
        .method_with_signature("<init>", "()V")
        .cloned()
        .ok_or_else(|| VmError::MethodNotFoundException(format!("{}.<init>()V", class_name)))?;
    interpreter.execute_method(&class, &constructor, vec![instance])?;
    Ok(instance)
}

/// Pass-through: simply runs the privileged action's `run` method.
fn do_privileged(interpreter: &mut Interpreter, arguments: Vec<Value>) -> InvokeResult {
    let action = arg(&arguments, 0)?;
    let addr = action.as_object()?;
    let mut current = interpreter.memory().object(addr)?.class.clone();
    loop {
        if let Some(method) = current.method_with_name("run", MethodAccessFlags::empty()) {
            let method = method.clone();
            return interpreter.execute_method(&current, &method, vec![action]);
        }
        match interpreter.class_loader_mut().super_class_of(&current)? {
            Some(super_class) => current = super_class,
            None => {
                return Err(VmError::MethodNotFoundException(
                    "PrivilegedAction.run".to_string(),
                )
                .into())
            }
        }
    }
}

fn file_output_stream_write_bytes(
    interpreter: &mut Interpreter,
    arguments: Vec<Value>,
) -> InvokeResult {
    let this_addr = arg(&arguments, 0)?.as_object()?;
    let array_addr = arg(&arguments, 1)?.as_array()?;
    let offset = arg(&arguments, 2)?.as_int()?;
    let length = arg(&arguments, 3)?.as_int()?;
    // argument 4 is the append flag, irrelevant for console streams

    let fd_object = interpreter
        .memory()
        .object(this_addr)?
        .field("java/io/FileOutputStream", "fd")
        .copied()
        .ok_or_else(|| VmError::FieldNotFoundException("FileOutputStream::fd".to_string()))?;
    let fd = interpreter
        .memory()
        .object(fd_object.as_object()?)?
        .field("java/io/FileDescriptor", "fd")
        .copied()
        .ok_or_else(|| VmError::FieldNotFoundException("FileDescriptor::fd".to_string()))?
        .as_int()?;

    let array = interpreter.memory().array(array_addr)?;
    if offset < 0 || length < 0 || offset as i64 + length as i64 > array.len() as i64 {
        return Err(VmError::ArrayIndexOutOfBounds {
            index: offset.saturating_add(length),
            length: array.len(),
        }
        .into());
    }
    let mut bytes = Vec::with_capacity(length as usize);
    for i in 0..length {
        bytes.push(array.get(offset + i)?.as_int()? as u8);
    }

    let written = match fd {
        1 => std::io::stdout().write_all(&bytes),
        2 => std::io::stderr().write_all(&bytes),
        other => {
            warn!("skipping write to unsupported file descriptor {}", other);
            Ok(())
        }
    };
    written.map_err(|e| VmError::ExecuteCodeError(e.to_string()))?;
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_matches_on_full_triple() {
        let overrides = MethodOverrides::with_defaults();
        assert!(overrides
            .find("java/lang/Double", "longBitsToDouble", "(J)D")
            .is_some());
        assert!(overrides
            .find("java/lang/Double", "longBitsToDouble", "(D)J")
            .is_none());
        assert!(overrides.find("java/lang/Object", "hashCode", "()I").is_some());
    }

    #[test]
    fn overrides_can_be_replaced() {
        let mut overrides = MethodOverrides::new();
        overrides.add("A", "f", "()I", class_desired_assertion_status);
        overrides.add("A", "f", "()I", object_hash_code);
        let found = overrides.find("A", "f", "()I").unwrap();
        assert_eq!(found as usize, object_hash_code as OverrideFn as usize);
    }

    #[test]
    fn arraycopy_bounds_check_survives_large_positions() {
        use crate::value::ValueType;
        use crate::vm_error::MethodCallError;

        let mut interpreter = Interpreter::new();
        let src = interpreter.memory_mut().allocate_array(ValueType::Integer, 1);
        let dst = interpreter.memory_mut().allocate_array(ValueType::Integer, 1);
        // src_pos + length exceeds i32 range
        let result = system_arraycopy(
            &mut interpreter,
            vec![
                src,
                Value::Int(2_000_000_000),
                dst,
                Value::Int(0),
                Value::Int(2_000_000_000),
            ],
        );
        assert_eq!(
            Err(MethodCallError::InternalError(VmError::ArrayIndexOutOfBounds {
                index: i32::MAX,
                length: 1,
            })),
            result
        );
    }
}
