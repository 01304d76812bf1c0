use crate::access_flags::ClassAccessFlags;
use crate::attribute_info::AttributeInfo;
use crate::byte_buffer::ByteBuffer;
use crate::class_file::ClassFile;
use crate::constant_pool::ConstantPool;
use crate::error::{ClassFileError, Result};
use crate::field_info::FieldInfo;
use crate::method_info::MethodInfo;
use log::warn;

const CLASS_FILE_MAGIC: u32 = 0xCAFEBABE;

/// Parses one class file from an in-memory buffer, strictly sequentially.
pub fn read_buffer(data: &[u8]) -> Result<ClassFile> {
    let mut buffer = ByteBuffer::new(data);

    let magic = buffer.read_u32()?;
    if magic != CLASS_FILE_MAGIC {
        return Err(ClassFileError::InvalidMagicNumber(magic));
    }
    let minor_version = buffer.read_u16()?;
    let major_version = buffer.read_u16()?;

    let constant_pool_count = buffer.read_u16()?;
    let mut constant_pool = ConstantPool::new();
    constant_pool.read_entries(&mut buffer, constant_pool_count)?;

    let access_flags = ClassAccessFlags::from_bits_truncate(buffer.read_u16()?);
    let this_class = buffer.read_u16()?;
    let super_class = buffer.read_u16()?;

    let interface_count = buffer.read_u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(buffer.read_u16()?);
    }

    let mut attribute_bytes = Vec::new();

    let field_count = buffer.read_u16()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(FieldInfo::read(&mut buffer, &mut attribute_bytes)?);
    }

    let method_count = buffer.read_u16()?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        methods.push(MethodInfo::read(&mut buffer, &mut attribute_bytes)?);
    }

    let attributes = AttributeInfo::read_many(&mut buffer, &mut attribute_bytes)?;

    if buffer.has_more_data() {
        warn!(
            "class data has {} trailing bytes after the attribute table",
            data.len() - buffer.position
        );
    }

    ClassFile::resolve(
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
        attribute_bytes,
    )
}
