use crate::value::{Value, ValueType};
use crate::vm_error::{VmError, VmExecResult};

/// Operand stack of one frame, capacity-checked against the method's
/// declared max stack depth.
#[derive(Debug)]
pub struct OperandStack {
    values: Vec<Value>,
    max_size: usize,
}

impl OperandStack {
    pub fn new(max_size: usize) -> OperandStack {
        OperandStack {
            values: Vec::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, value: Value) -> VmExecResult<()> {
        if self.values.len() >= self.max_size {
            Err(VmError::StackOverFlow)
        } else {
            self.values.push(value);
            Ok(())
        }
    }

    pub fn pop(&mut self) -> VmExecResult<Value> {
        self.values.pop().ok_or(VmError::PopFromEmptyStack)
    }

    /// Pops `count` values, preserving their stack order in the result.
    pub fn pop_n(&mut self, count: usize) -> VmExecResult<Vec<Value>> {
        if count > self.values.len() {
            Err(VmError::PopFromEmptyStack)
        } else {
            Ok(self.values.split_off(self.values.len() - count))
        }
    }

    /// Value `depth` slots below the top.
    pub fn peek(&self, depth: usize) -> VmExecResult<Value> {
        if depth >= self.values.len() {
            Err(VmError::PopFromEmptyStack)
        } else {
            Ok(self.values[self.values.len() - 1 - depth])
        }
    }

    pub fn top(&self) -> VmExecResult<Value> {
        self.peek(0)
    }

    pub fn dup(&mut self) -> VmExecResult<()> {
        let top = self.top()?;
        self.push(top)
    }

    pub fn dup_x1(&mut self) -> VmExecResult<()> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        self.push(v1)?;
        self.push(v2)?;
        self.push(v1)
    }

    /// Duplicates either one category-2 value or the top two category-1
    /// values.
    pub fn dup2(&mut self) -> VmExecResult<()> {
        let x1 = self.top()?;
        if matches!(x1.value_type(), ValueType::Long | ValueType::Double) {
            return self.push(x1);
        }
        let x2 = self.peek(1)?;
        self.push(x2)?;
        self.push(x1)
    }

    /// Pops one category-2 value or two category-1 values.
    pub fn pop2(&mut self) -> VmExecResult<()> {
        let top = self.pop()?;
        if !matches!(top.value_type(), ValueType::Long | ValueType::Double) {
            self.pop()?;
        }
        Ok(())
    }

    pub fn swap(&mut self) -> VmExecResult<()> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        self.push(v1)?;
        self.push(v2)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_respects_max_size() {
        let mut stack = OperandStack::new(1);
        stack.push(Value::Int(1)).unwrap();
        assert_eq!(Err(VmError::StackOverFlow), stack.push(Value::Int(2)));
    }

    #[test]
    fn pop_n_keeps_stack_order() {
        let mut stack = OperandStack::new(4);
        for i in 0..4 {
            stack.push(Value::Int(i)).unwrap();
        }
        let values = stack.pop_n(3).unwrap();
        assert_eq!(vec![Value::Int(1), Value::Int(2), Value::Int(3)], values);
        assert_eq!(1, stack.len());
        assert!(stack.pop_n(2).is_err());
    }

    #[test]
    fn dup2_is_category_aware() {
        let mut stack = OperandStack::new(4);
        stack.push(Value::Long(9)).unwrap();
        stack.dup2().unwrap();
        assert_eq!(2, stack.len());

        let mut stack = OperandStack::new(4);
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        stack.dup2().unwrap();
        assert_eq!(4, stack.len());
        assert_eq!(Value::Int(2), stack.pop().unwrap());
        assert_eq!(Value::Int(1), stack.pop().unwrap());
    }

    #[test]
    fn peek_reaches_below_the_top() {
        let mut stack = OperandStack::new(3);
        stack.push(Value::Int(10)).unwrap();
        stack.push(Value::Int(20)).unwrap();
        assert_eq!(Value::Int(20), stack.peek(0).unwrap());
        assert_eq!(Value::Int(10), stack.peek(1).unwrap());
        assert!(stack.peek(2).is_err());
    }
}
