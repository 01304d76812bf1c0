//! A small class-file interpreter. Parsing lives in the `classfile`
//! crate; this crate adds class loading, a heap, and the execution
//! engine.

pub mod class_loader;
pub mod descriptor;
pub mod heap;
pub mod interpreter;
pub mod method_overrides;
pub mod opcode;
pub mod operand_stack;
pub mod value;
pub mod vm_error;
