use crate::value::ValueType;
use crate::vm_error::{VmError, VmExecResult};

/// A parsed field or method descriptor.
///
/// For methods the return type follows the closing parenthesis; for field
/// descriptors `return_type` is simply the described type.
#[derive(Debug, Clone)]
pub struct Descriptor {
    raw: String,
    is_method: bool,
    return_type: ValueType,
    argument_count: usize,
}

fn end_of_object_type(bytes: &[u8], mut at: usize, raw: &str) -> VmExecResult<usize> {
    while at < bytes.len() {
        if bytes[at] == b';' {
            return Ok(at);
        }
        at += 1;
    }
    Err(VmError::InvalidDescriptor(raw.to_string()))
}

/// Returns the index of the last byte of the element that starts at `at`.
fn end_of_one_type(bytes: &[u8], at: usize, raw: &str) -> VmExecResult<usize> {
    match bytes[at] {
        b'L' => end_of_object_type(bytes, at, raw),
        b'[' => {
            let mut cursor = at;
            while cursor < bytes.len() && bytes[cursor] == b'[' {
                cursor += 1;
            }
            if cursor >= bytes.len() {
                return Err(VmError::InvalidDescriptor(raw.to_string()));
            }
            if bytes[cursor] == b'L' {
                end_of_object_type(bytes, cursor, raw)
            } else {
                Ok(cursor)
            }
        }
        _ => Ok(at),
    }
}

impl Descriptor {
    pub fn parse(descriptor: &str) -> VmExecResult<Descriptor> {
        if descriptor.is_empty() {
            return Err(VmError::InvalidDescriptor(descriptor.to_string()));
        }
        let bytes = descriptor.as_bytes();
        let closing = descriptor.find(')');
        let is_method = bytes[0] == b'(' && closing.is_some();

        let return_position = closing.map(|at| at + 1).unwrap_or(0);
        if return_position >= bytes.len() {
            return Err(VmError::InvalidDescriptor(descriptor.to_string()));
        }
        let return_type = ValueType::from_descriptor_char(bytes[return_position] as char);

        let mut argument_count = 0;
        if is_method {
            let mut cursor = 1;
            while bytes[cursor] != b')' {
                cursor = end_of_one_type(bytes, cursor, descriptor)? + 1;
                if cursor >= bytes.len() {
                    return Err(VmError::InvalidDescriptor(descriptor.to_string()));
                }
                argument_count += 1;
            }
        }

        Ok(Descriptor {
            raw: descriptor.to_string(),
            is_method,
            return_type,
            argument_count,
        })
    }

    pub fn is_method(&self) -> bool {
        self.is_method
    }

    pub fn return_type(&self) -> ValueType {
        self.return_type
    }

    pub fn argument_count(&self) -> usize {
        self.argument_count
    }

    /// Type of the `id`-th argument, in declaration order.
    pub fn argument(&self, id: usize) -> VmExecResult<ValueType> {
        if id >= self.argument_count {
            return Err(VmError::InvalidDescriptor(format!(
                "argument {} out of bounds in {}",
                id, self.raw
            )));
        }
        let bytes = self.raw.as_bytes();
        let mut cursor = 1;
        for _ in 0..id {
            cursor = end_of_one_type(bytes, cursor, &self.raw)? + 1;
        }
        Ok(ValueType::from_descriptor_char(bytes[cursor] as char))
    }
}
