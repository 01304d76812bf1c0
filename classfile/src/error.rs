use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ClassFileError {
    #[error("unexpected end of class data")]
    UnexpectedEndOfData,
    #[error("invalid magic number {0:#010x}")]
    InvalidMagicNumber(u32),
    #[error("unsupported constant pool tag {0}")]
    UnsupportedConstantPoolTag(u8),
    #[error("invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("constant pool entry {0} has unexpected kind, expected {1}")]
    UnexpectedConstantKind(u16, &'static str),
    #[error("invalid cesu8 string")]
    InvalidCesu8String,
    #[error("method {0} is native and has no code")]
    NativeMethodHasNoCode(String),
    #[error("method {0} has no code attribute, abstract?")]
    MissingCodeAttribute(String),
    #[error("code of method {0} exceeds the supported length")]
    CodeTooLong(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("field not found: {0}")]
    FieldNotFound(String),
}

pub type Result<T> = std::result::Result<T, ClassFileError>;
