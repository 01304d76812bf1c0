use crate::access_flags::MethodAccessFlags;
use crate::attribute_info::AttributeInfo;
use crate::byte_buffer::ByteBuffer;
use crate::constant_pool::ConstantPoolIndex;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name_index: ConstantPoolIndex,
    pub descriptor_index: ConstantPoolIndex,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    pub fn read(buffer: &mut ByteBuffer, side_buffer: &mut Vec<u8>) -> Result<MethodInfo> {
        let access_flags = MethodAccessFlags::from_bits_truncate(buffer.read_u16()?);
        let name_index = buffer.read_u16()?;
        let descriptor_index = buffer.read_u16()?;
        let attributes = AttributeInfo::read_many(buffer, side_buffer)?;
        Ok(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }
}
