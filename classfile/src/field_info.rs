use crate::access_flags::FieldAccessFlags;
use crate::attribute_info::AttributeInfo;
use crate::byte_buffer::ByteBuffer;
use crate::constant_pool::ConstantPoolIndex;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name_index: ConstantPoolIndex,
    pub descriptor_index: ConstantPoolIndex,
    pub attributes: Vec<AttributeInfo>,
}

impl FieldInfo {
    pub fn read(buffer: &mut ByteBuffer, side_buffer: &mut Vec<u8>) -> Result<FieldInfo> {
        let access_flags = FieldAccessFlags::from_bits_truncate(buffer.read_u16()?);
        let name_index = buffer.read_u16()?;
        let descriptor_index = buffer.read_u16()?;
        let attributes = AttributeInfo::read_many(buffer, side_buffer)?;
        Ok(FieldInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::PRIVATE)
    }
}

/// Declaration-order snapshot of a field, with names already resolved.
#[derive(Debug, Clone)]
pub struct FieldSummary {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    pub is_private: bool,
}
