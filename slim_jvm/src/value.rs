use crate::vm_error::{VmError, VmExecResult};
use strum_macros::Display;

/// Address of one heap entry. The heap is append-only for the life of the
/// interpreter, so an address never dangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapAddr(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ValueType {
    Integer,
    Float,
    Char,
    Byte,
    Short,
    Double,
    ObjectRef,
    ArrayRef,
    Boolean,
    Long,
    None,
}

impl ValueType {
    /// The storage-width class a nominal type collapses to. Boolean, Char,
    /// Short and Byte live in Integer cells; arrays are objects.
    pub fn memory_type(self) -> ValueType {
        match self {
            ValueType::Boolean | ValueType::Char | ValueType::Short | ValueType::Byte => {
                ValueType::Integer
            }
            ValueType::ArrayRef => ValueType::ObjectRef,
            other => other,
        }
    }

    pub fn from_descriptor_char(c: char) -> ValueType {
        match c {
            'I' => ValueType::Integer,
            'B' => ValueType::Byte,
            'C' => ValueType::Char,
            'D' => ValueType::Double,
            'F' => ValueType::Float,
            'J' => ValueType::Long,
            'L' => ValueType::ObjectRef,
            'S' => ValueType::Short,
            'Z' => ValueType::Boolean,
            '[' => ValueType::ArrayRef,
            _ => ValueType::None,
        }
    }

    /// The `newarray` instruction's element type encoding.
    pub fn from_array_type_code(code: u8) -> VmExecResult<ValueType> {
        match code {
            4 => Ok(ValueType::Boolean),
            5 => Ok(ValueType::Char),
            6 => Ok(ValueType::Float),
            7 => Ok(ValueType::Double),
            8 => Ok(ValueType::Byte),
            9 => Ok(ValueType::Short),
            10 => Ok(ValueType::Integer),
            11 => Ok(ValueType::Long),
            c => Err(VmError::UnknownArrayTypeCode(c)),
        }
    }
}

/// One runtime value. Boolean/Char/Short/Byte keep their nominal tag but
/// store an i32 payload; Long and Double occupy a single logical slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Char(i32),
    Short(i32),
    Byte(i32),
    Boolean(i32),
    ObjectRef(HeapAddr),
    ArrayRef(HeapAddr),
    Null,
    None,
}

impl Value {
    pub fn default_of(value_type: ValueType) -> Value {
        match value_type {
            ValueType::Integer => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Char => Value::Char(0),
            ValueType::Byte => Value::Byte(0),
            ValueType::Short => Value::Short(0),
            ValueType::Double => Value::Double(0.0),
            ValueType::Boolean => Value::Boolean(0),
            ValueType::Long => Value::Long(0),
            ValueType::ObjectRef | ValueType::ArrayRef => Value::Null,
            ValueType::None => Value::None,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::Char(_) => ValueType::Char,
            Value::Short(_) => ValueType::Short,
            Value::Byte(_) => ValueType::Byte,
            Value::Boolean(_) => ValueType::Boolean,
            Value::ObjectRef(_) => ValueType::ObjectRef,
            Value::ArrayRef(_) => ValueType::ArrayRef,
            Value::Null => ValueType::ObjectRef,
            Value::None => ValueType::None,
        }
    }

    pub fn memory_type(&self) -> ValueType {
        self.value_type().memory_type()
    }

    pub fn is_stored_as_integer(&self) -> bool {
        self.memory_type() == ValueType::Integer
    }

    fn mismatch(&self, expected: ValueType) -> VmError {
        VmError::TypeMismatch {
            expected,
            found: self.value_type(),
        }
    }

    /// The i32 payload of any Integer-stored value.
    pub fn as_int(&self) -> VmExecResult<i32> {
        match self {
            Value::Int(v) | Value::Char(v) | Value::Short(v) | Value::Byte(v)
            | Value::Boolean(v) => Ok(*v),
            other => Err(other.mismatch(ValueType::Integer)),
        }
    }

    pub fn as_long(&self) -> VmExecResult<i64> {
        match self {
            Value::Long(v) => Ok(*v),
            other => Err(other.mismatch(ValueType::Long)),
        }
    }

    pub fn as_float(&self) -> VmExecResult<f32> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(other.mismatch(ValueType::Float)),
        }
    }

    pub fn as_double(&self) -> VmExecResult<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            other => Err(other.mismatch(ValueType::Double)),
        }
    }

    /// Non-null object reference.
    pub fn as_object(&self) -> VmExecResult<HeapAddr> {
        match self {
            Value::ObjectRef(addr) => Ok(*addr),
            Value::Null => Err(VmError::NullPointer),
            other => Err(other.mismatch(ValueType::ObjectRef)),
        }
    }

    /// Non-null array reference.
    pub fn as_array(&self) -> VmExecResult<HeapAddr> {
        match self {
            Value::ArrayRef(addr) => Ok(*addr),
            Value::Null => Err(VmError::NullPointer),
            other => Err(other.mismatch(ValueType::ArrayRef)),
        }
    }

    /// Reference identity: Some(addr) for object/array refs, None for null.
    pub fn as_reference(&self) -> VmExecResult<Option<HeapAddr>> {
        match self {
            Value::ObjectRef(addr) | Value::ArrayRef(addr) => Ok(Some(*addr)),
            Value::Null => Ok(None),
            other => Err(other.mismatch(ValueType::ObjectRef)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_types_collapse_to_integer_storage() {
        assert_eq!(ValueType::Integer, Value::Boolean(1).memory_type());
        assert_eq!(ValueType::Integer, Value::Char(65).memory_type());
        assert_eq!(ValueType::Integer, Value::Short(-3).memory_type());
        assert_eq!(ValueType::Integer, Value::Byte(7).memory_type());
        assert!(Value::Byte(7).is_stored_as_integer());
        assert!(!Value::Long(7).is_stored_as_integer());
    }

    #[test]
    fn arrays_are_objects_in_memory() {
        assert_eq!(ValueType::ObjectRef, ValueType::ArrayRef.memory_type());
        assert_eq!(ValueType::ObjectRef, Value::Null.memory_type());
    }

    #[test]
    fn defaults_match_declared_types() {
        assert_eq!(Value::Int(0), Value::default_of(ValueType::Integer));
        assert_eq!(Value::Null, Value::default_of(ValueType::ObjectRef));
        assert_eq!(Value::None, Value::default_of(ValueType::None));
        assert_eq!(Value::Long(0), Value::default_of(ValueType::Long));
    }

    #[test]
    fn accessors_reject_wrong_storage() {
        assert!(Value::Long(1).as_int().is_err());
        assert_eq!(Err(VmError::NullPointer), Value::Null.as_object());
        assert_eq!(Ok(None), Value::Null.as_reference());
        assert_eq!(Ok(65), Value::Char(65).as_int());
    }
}
