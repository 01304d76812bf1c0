use crate::value::{Value, ValueType};
use classfile::error::ClassFileError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum VmError {
    #[error("ClassNotFoundException {0}")]
    ClassNotFoundException(String),
    #[error("MethodNotFoundException {0}")]
    MethodNotFoundException(String),
    #[error("FieldNotFoundException {0}")]
    FieldNotFoundException(String),
    #[error("ClassFormatError {0}")]
    ClassFormatError(#[from] ClassFileError),
    #[error("ClassPathNotExist {0}")]
    ClassPathNotExist(String),
    #[error("JarFileNotExist {0}")]
    JarFileNotExist(String),
    #[error("ReadClassBytesError {0}")]
    ReadClassBytesError(String),
    #[error("type mismatch, expected {expected} found {found}")]
    TypeMismatch {
        expected: ValueType,
        found: ValueType,
    },
    #[error("invalid descriptor {0}")]
    InvalidDescriptor(String),
    #[error("null pointer")]
    NullPointer,
    #[error("invalid heap address {0}")]
    InvalidHeapAddress(usize),
    #[error("array index {index} out of bounds for length {length}")]
    ArrayIndexOutOfBounds { index: i32, length: usize },
    #[error("unknown array type code {0}")]
    UnknownArrayTypeCode(u8),
    #[error("division by zero")]
    DivisionByZero,
    #[error("can't pop from empty stack")]
    PopFromEmptyStack,
    #[error("stack over flow")]
    StackOverFlow,
    #[error("unsupported instruction {0:#04x}")]
    UnsupportedInstruction(u8),
    #[error("unexpected constant kind at index {0}")]
    UnexpectedConstant(u16),
    #[error("ExecuteCodeError {0}")]
    ExecuteCodeError(String),
}

pub type VmExecResult<T> = std::result::Result<T, VmError>;

/// Outcome surface of one method call. A guest `athrow` becomes
/// `ExceptionThrown` carrying the thrown heap object and unwinds every
/// intervening frame; there is no handler-table walking.
#[derive(Error, Debug, PartialEq)]
pub enum MethodCallError {
    #[error("internal error {0}")]
    InternalError(#[from] VmError),
    #[error("guest exception thrown")]
    ExceptionThrown(Value),
}

impl From<ClassFileError> for MethodCallError {
    fn from(error: ClassFileError) -> Self {
        MethodCallError::InternalError(VmError::ClassFormatError(error))
    }
}

pub type InvokeResult = std::result::Result<Value, MethodCallError>;
