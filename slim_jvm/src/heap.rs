use crate::value::{HeapAddr, Value, ValueType};
use crate::vm_error::{VmError, VmExecResult};
use classfile::class_file::ClassFile;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::rc::Rc;

/// Fixed-length homogeneous array.
#[derive(Debug)]
pub struct JavaArray {
    pub element_type: ValueType,
    /// Class name of the elements, for reference arrays.
    pub element_class_name: Option<String>,
    pub values: Vec<Value>,
}

impl JavaArray {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn memory_type(&self) -> ValueType {
        self.element_type.memory_type()
    }

    fn check_bounds(&self, index: i32) -> VmExecResult<usize> {
        if index < 0 || index as usize >= self.values.len() {
            Err(VmError::ArrayIndexOutOfBounds {
                index,
                length: self.values.len(),
            })
        } else {
            Ok(index as usize)
        }
    }

    pub fn get(&self, index: i32) -> VmExecResult<Value> {
        let index = self.check_bounds(index)?;
        Ok(self.values[index])
    }

    pub fn set(&mut self, index: i32, value: Value) -> VmExecResult<()> {
        let index = self.check_bounds(index)?;
        self.values[index] = value;
        Ok(())
    }
}

/// A class instance. Private fields are keyed `Declaring__name` so that a
/// shadowed private field of a superclass cannot collide with a subclass
/// field of the same name.
#[derive(Debug)]
pub struct ObjectInstance {
    pub class: Rc<ClassFile>,
    pub fields: IndexMap<String, Value>,
}

impl ObjectInstance {
    pub fn private_key(class_name: &str, field_name: &str) -> String {
        format!("{}__{}", class_name, field_name)
    }

    /// Bare-name lookup with private-key fallback for `class_name`.
    pub fn field(&self, class_name: &str, field_name: &str) -> Option<&Value> {
        self.fields
            .get(field_name)
            .or_else(|| self.fields.get(&Self::private_key(class_name, field_name)))
    }

    pub fn field_mut(&mut self, class_name: &str, field_name: &str) -> Option<&mut Value> {
        if self.fields.contains_key(field_name) {
            self.fields.get_mut(field_name)
        } else {
            self.fields
                .get_mut(&Self::private_key(class_name, field_name))
        }
    }
}

#[derive(Debug)]
pub enum HeapEntry {
    Object(ObjectInstance),
    Array(JavaArray),
}

/// Owns every allocated object and array plus the global (static) variable
/// table. Nothing is ever reclaimed; addresses stay valid for the process
/// lifetime.
#[derive(Debug, Default)]
pub struct VmMemory {
    entries: Vec<HeapEntry>,
    globals: HashMap<(String, String), Value>,
}

impl VmMemory {
    pub fn new() -> VmMemory {
        VmMemory::default()
    }

    fn push(&mut self, entry: HeapEntry) -> HeapAddr {
        self.entries.push(entry);
        HeapAddr(self.entries.len() - 1)
    }

    pub fn allocate_object(
        &mut self,
        class: Rc<ClassFile>,
        fields: IndexMap<String, Value>,
    ) -> Value {
        Value::ObjectRef(self.push(HeapEntry::Object(ObjectInstance { class, fields })))
    }

    pub fn allocate_array(&mut self, element_type: ValueType, length: usize) -> Value {
        let values = vec![Value::default_of(element_type); length];
        Value::ArrayRef(self.push(HeapEntry::Array(JavaArray {
            element_type,
            element_class_name: None,
            values,
        })))
    }

    pub fn allocate_object_array(&mut self, length: usize, element_class_name: &str) -> Value {
        let values = vec![Value::Null; length];
        Value::ArrayRef(self.push(HeapEntry::Array(JavaArray {
            element_type: ValueType::ObjectRef,
            element_class_name: Some(element_class_name.to_string()),
            values,
        })))
    }

    pub fn entry(&self, addr: HeapAddr) -> VmExecResult<&HeapEntry> {
        self.entries
            .get(addr.0)
            .ok_or(VmError::InvalidHeapAddress(addr.0))
    }

    fn entry_mut(&mut self, addr: HeapAddr) -> VmExecResult<&mut HeapEntry> {
        self.entries
            .get_mut(addr.0)
            .ok_or(VmError::InvalidHeapAddress(addr.0))
    }

    pub fn object(&self, addr: HeapAddr) -> VmExecResult<&ObjectInstance> {
        match self.entry(addr)? {
            HeapEntry::Object(object) => Ok(object),
            HeapEntry::Array(_) => Err(VmError::TypeMismatch {
                expected: ValueType::ObjectRef,
                found: ValueType::ArrayRef,
            }),
        }
    }

    pub fn object_mut(&mut self, addr: HeapAddr) -> VmExecResult<&mut ObjectInstance> {
        match self.entry_mut(addr)? {
            HeapEntry::Object(object) => Ok(object),
            HeapEntry::Array(_) => Err(VmError::TypeMismatch {
                expected: ValueType::ObjectRef,
                found: ValueType::ArrayRef,
            }),
        }
    }

    pub fn array(&self, addr: HeapAddr) -> VmExecResult<&JavaArray> {
        match self.entry(addr)? {
            HeapEntry::Array(array) => Ok(array),
            HeapEntry::Object(_) => Err(VmError::TypeMismatch {
                expected: ValueType::ArrayRef,
                found: ValueType::ObjectRef,
            }),
        }
    }

    pub fn array_mut(&mut self, addr: HeapAddr) -> VmExecResult<&mut JavaArray> {
        match self.entry_mut(addr)? {
            HeapEntry::Array(array) => Ok(array),
            HeapEntry::Object(_) => Err(VmError::TypeMismatch {
                expected: ValueType::ArrayRef,
                found: ValueType::ObjectRef,
            }),
        }
    }

    /// Creates the static slot; runs exactly once per class, at preparation.
    pub fn init_global(&mut self, class_name: &str, field_name: &str, value_type: ValueType) {
        self.globals.insert(
            (class_name.to_string(), field_name.to_string()),
            Value::default_of(value_type),
        );
    }

    pub fn get_global(&self, class_name: &str, field_name: &str) -> VmExecResult<Value> {
        self.globals
            .get(&(class_name.to_string(), field_name.to_string()))
            .copied()
            .ok_or_else(|| {
                VmError::FieldNotFoundException(format!("{}::{}", class_name, field_name))
            })
    }

    pub fn put_global(
        &mut self,
        class_name: &str,
        field_name: &str,
        value: Value,
    ) -> VmExecResult<()> {
        let slot = self
            .globals
            .get_mut(&(class_name.to_string(), field_name.to_string()))
            .ok_or_else(|| {
                VmError::FieldNotFoundException(format!("{}::{}", class_name, field_name))
            })?;
        if slot.memory_type() != value.memory_type() {
            return Err(VmError::TypeMismatch {
                expected: slot.memory_type(),
                found: value.memory_type(),
            });
        }
        *slot = value;
        Ok(())
    }

    /// Reads a `java/lang/String` instance back into a host string via its
    /// private char-array field.
    pub fn string_value(&self, addr: HeapAddr) -> VmExecResult<String> {
        let object = self.object(addr)?;
        let value_field = object
            .field("java/lang/String", "value")
            .ok_or_else(|| VmError::FieldNotFoundException("java/lang/String::value".to_string()))?;
        let chars = self.array(value_field.as_array()?)?;
        let units: Vec<u16> = chars
            .values
            .iter()
            .map(|value| value.as_int().map(|v| v as u16))
            .collect::<VmExecResult<_>>()?;
        Ok(String::from_utf16_lossy(&units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_are_default_filled_and_bounds_checked() {
        let mut memory = VmMemory::new();
        let array_ref = memory.allocate_array(ValueType::Byte, 4);
        let addr = array_ref.as_array().unwrap();
        assert_eq!(Value::Byte(0), memory.array(addr).unwrap().get(3).unwrap());
        memory.array_mut(addr).unwrap().set(3, Value::Byte(-1)).unwrap();
        assert_eq!(Value::Byte(-1), memory.array(addr).unwrap().get(3).unwrap());
        assert_eq!(
            Err(VmError::ArrayIndexOutOfBounds { index: 4, length: 4 }),
            memory.array(addr).unwrap().get(4)
        );
        assert_eq!(
            Err(VmError::ArrayIndexOutOfBounds { index: -1, length: 4 }),
            memory.array(addr).unwrap().get(-1)
        );
    }

    #[test]
    fn object_arrays_remember_their_element_class() {
        let mut memory = VmMemory::new();
        let array_ref = memory.allocate_object_array(2, "java/lang/String");
        let array = memory.array(array_ref.as_array().unwrap()).unwrap();
        assert_eq!(Some("java/lang/String".to_string()), array.element_class_name);
        assert_eq!(Value::Null, array.values[0]);
    }

    #[test]
    fn globals_require_initialization_and_matching_memory_type() {
        let mut memory = VmMemory::new();
        assert!(memory.get_global("A", "counter").is_err());
        memory.init_global("A", "counter", ValueType::Integer);
        assert_eq!(Value::Int(0), memory.get_global("A", "counter").unwrap());
        // boolean collapses to integer storage, so this put is legal
        memory.put_global("A", "counter", Value::Boolean(1)).unwrap();
        assert_eq!(
            Err(VmError::TypeMismatch {
                expected: ValueType::Integer,
                found: ValueType::Long,
            }),
            memory.put_global("A", "counter", Value::Long(1))
        );
        assert!(memory.put_global("A", "missing", Value::Int(1)).is_err());
    }
}
