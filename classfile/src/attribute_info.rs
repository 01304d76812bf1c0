use crate::byte_buffer::ByteBuffer;
use crate::constant_pool::ConstantPoolIndex;
use crate::error::Result;

/// One attribute table entry. The body bytes live in the class's shared
/// side buffer; the entry only records where its slice starts.
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub name_index: ConstantPoolIndex,
    pub offset: usize,
    pub len: usize,
}

impl AttributeInfo {
    pub fn read(buffer: &mut ByteBuffer, side_buffer: &mut Vec<u8>) -> Result<AttributeInfo> {
        let name_index = buffer.read_u16()?;
        let len = buffer.read_u32()? as usize;
        let offset = buffer.read_into(len, side_buffer)?;
        Ok(AttributeInfo {
            name_index,
            offset,
            len,
        })
    }

    pub fn read_many(
        buffer: &mut ByteBuffer,
        side_buffer: &mut Vec<u8>,
    ) -> Result<Vec<AttributeInfo>> {
        let count = buffer.read_u16()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            attributes.push(AttributeInfo::read(buffer, side_buffer)?);
        }
        Ok(attributes)
    }
}

/// The executable body extracted from a method's Code attribute.
#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

impl CodeAttribute {
    pub fn parse(body: &[u8]) -> Result<CodeAttribute> {
        let mut buffer = ByteBuffer::new(body);
        let max_stack = buffer.read_u16()?;
        let max_locals = buffer.read_u16()?;
        let code_length = buffer.read_u32()? as usize;
        let code = buffer.read_bytes(code_length)?.to_vec();
        // exception table and nested attributes are intentionally skipped
        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
        })
    }
}
