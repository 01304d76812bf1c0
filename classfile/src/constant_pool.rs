use crate::byte_buffer::ByteBuffer;
use crate::error::{ClassFileError, Result};
use cesu8::from_java_cesu8;

pub type ConstantPoolIndex = u16;

/// One logical constant pool entry.
///
/// UTF8 entries keep an offset and length into the pool's side buffer of
/// raw bytes instead of an inline string, so nothing is copied or decoded
/// during the parse. `Start` occupies the reserved index 0 and `Filler`
/// follows every 8-byte entry so that indices keep the 1-based numbering
/// of the on-disk format.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolEntry {
    Start,
    Filler,
    Utf8 { offset: usize, len: usize },
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    ClassReference(ConstantPoolIndex),
    StringReference(ConstantPoolIndex),
    FieldReference(ConstantPoolIndex, ConstantPoolIndex),
    MethodReference(ConstantPoolIndex, ConstantPoolIndex),
    InterfaceMethodReference(ConstantPoolIndex, ConstantPoolIndex),
    NameAndTypeDescriptor(ConstantPoolIndex, ConstantPoolIndex),
    MethodHandle(u8, ConstantPoolIndex),
    MethodType(ConstantPoolIndex),
    InvokeDynamic(u16, ConstantPoolIndex),
}

impl ConstantPoolEntry {
    pub fn takes_two_slots(&self) -> bool {
        matches!(
            self,
            ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_)
        )
    }
}

#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<ConstantPoolEntry>,
    utf8_bytes: Vec<u8>,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: vec![ConstantPoolEntry::Start],
            utf8_bytes: Vec::new(),
        }
    }

    /// Number of physical slots, including the reserved zero entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn add(&mut self, entry: ConstantPoolEntry) {
        let takes_two_slots = entry.takes_two_slots();
        self.entries.push(entry);
        if takes_two_slots {
            self.entries.push(ConstantPoolEntry::Filler);
        }
    }

    pub fn add_utf8(&mut self, text: &str) -> ConstantPoolIndex {
        let offset = self.utf8_bytes.len();
        self.utf8_bytes.extend_from_slice(text.as_bytes());
        self.add(ConstantPoolEntry::Utf8 {
            offset,
            len: text.len(),
        });
        (self.entries.len() - 1) as ConstantPoolIndex
    }

    /// Parses `count - 1` logical entries from `buffer`, honoring the
    /// two-slot numbering of Long/Double. Unknown tags are fatal.
    pub fn read_entries(&mut self, buffer: &mut ByteBuffer, count: u16) -> Result<()> {
        while self.entries.len() < count as usize {
            let entry = self.read_entry(buffer)?;
            self.add(entry);
        }
        Ok(())
    }

    fn read_entry(&mut self, buffer: &mut ByteBuffer) -> Result<ConstantPoolEntry> {
        let tag = buffer.read_u8()?;
        match tag {
            1 => {
                let len = buffer.read_u16()? as usize;
                let offset = buffer.read_into(len, &mut self.utf8_bytes)?;
                Ok(ConstantPoolEntry::Utf8 { offset, len })
            }
            3 => buffer.read_i32().map(ConstantPoolEntry::Integer),
            4 => buffer.read_f32().map(ConstantPoolEntry::Float),
            5 => buffer.read_i64().map(ConstantPoolEntry::Long),
            6 => buffer.read_f64().map(ConstantPoolEntry::Double),
            7 => buffer.read_u16().map(ConstantPoolEntry::ClassReference),
            8 => buffer.read_u16().map(ConstantPoolEntry::StringReference),
            9 => Ok(ConstantPoolEntry::FieldReference(
                buffer.read_u16()?,
                buffer.read_u16()?,
            )),
            10 => Ok(ConstantPoolEntry::MethodReference(
                buffer.read_u16()?,
                buffer.read_u16()?,
            )),
            11 => Ok(ConstantPoolEntry::InterfaceMethodReference(
                buffer.read_u16()?,
                buffer.read_u16()?,
            )),
            12 => Ok(ConstantPoolEntry::NameAndTypeDescriptor(
                buffer.read_u16()?,
                buffer.read_u16()?,
            )),
            15 => Ok(ConstantPoolEntry::MethodHandle(
                buffer.read_u8()?,
                buffer.read_u16()?,
            )),
            16 => buffer.read_u16().map(ConstantPoolEntry::MethodType),
            18 => Ok(ConstantPoolEntry::InvokeDynamic(
                buffer.read_u16()?,
                buffer.read_u16()?,
            )),
            t => Err(ClassFileError::UnsupportedConstantPoolTag(t)),
        }
    }

    /// 1-based lookup. Index 0 and filler slots are never valid targets.
    pub fn entry(&self, index: ConstantPoolIndex) -> Result<&ConstantPoolEntry> {
        match self.entries.get(index as usize) {
            None | Some(ConstantPoolEntry::Start) | Some(ConstantPoolEntry::Filler) => {
                Err(ClassFileError::InvalidConstantPoolIndex(index))
            }
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: ConstantPoolIndex) -> Result<String> {
        match self.entry(index)? {
            ConstantPoolEntry::Utf8 { offset, len } => {
                let bytes = &self.utf8_bytes[*offset..*offset + *len];
                from_java_cesu8(bytes)
                    .map(|cow| cow.into_owned())
                    .map_err(|_| ClassFileError::InvalidCesu8String)
            }
            _ => Err(ClassFileError::UnexpectedConstantKind(index, "Utf8")),
        }
    }

    /// Resolves a ClassReference entry to the referenced class name.
    pub fn class_name(&self, index: ConstantPoolIndex) -> Result<String> {
        match self.entry(index)? {
            ConstantPoolEntry::ClassReference(name_index) => self.utf8(*name_index),
            _ => Err(ClassFileError::UnexpectedConstantKind(index, "Class")),
        }
    }

    pub fn name_and_type(&self, index: ConstantPoolIndex) -> Result<(String, String)> {
        match self.entry(index)? {
            ConstantPoolEntry::NameAndTypeDescriptor(name_index, descriptor_index) => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            _ => Err(ClassFileError::UnexpectedConstantKind(index, "NameAndType")),
        }
    }

    /// Locates the UTF8 entry spelling `text`, if present. Used to cache
    /// the "Code" attribute name index once per class.
    pub fn find_utf8(&self, text: &str) -> Option<ConstantPoolIndex> {
        for (i, entry) in self.entries.iter().enumerate() {
            if let ConstantPoolEntry::Utf8 { offset, len } = entry {
                if &self.utf8_bytes[*offset..*offset + *len] == text.as_bytes() {
                    return Some(i as ConstantPoolIndex);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_pool_works() {
        let mut pool = ConstantPool::new();
        let utf8_index = pool.add_utf8("java/lang/Object");
        pool.add(ConstantPoolEntry::ClassReference(utf8_index));
        assert_eq!(1, utf8_index);
        assert_eq!("java/lang/Object", pool.utf8(utf8_index).unwrap());
        assert_eq!("java/lang/Object", pool.class_name(2).unwrap());
        assert!(pool.entry(0).is_err());
        assert!(pool.entry(40).is_err());
    }

    #[test]
    fn long_and_double_consume_two_slots() {
        let mut pool = ConstantPool::new();
        pool.add(ConstantPoolEntry::Long(77));
        pool.add(ConstantPoolEntry::Integer(5));
        assert_eq!(Ok(&ConstantPoolEntry::Long(77)), pool.entry(1));
        // index 2 is the filler slot and must never resolve
        assert_eq!(Err(ClassFileError::InvalidConstantPoolIndex(2)), pool.entry(2));
        assert_eq!(Ok(&ConstantPoolEntry::Integer(5)), pool.entry(3));
    }

    #[test]
    fn utf8_lookup_rejects_other_kinds() {
        let mut pool = ConstantPool::new();
        pool.add(ConstantPoolEntry::Integer(1));
        assert_eq!(
            Err(ClassFileError::UnexpectedConstantKind(1, "Utf8")),
            pool.utf8(1)
        );
    }

    #[test]
    fn find_utf8_scans_side_buffer() {
        let mut pool = ConstantPool::new();
        pool.add_utf8("Code");
        let index = pool.add_utf8("LineNumberTable");
        assert_eq!(Some(1), pool.find_utf8("Code"));
        assert_eq!(Some(index), pool.find_utf8("LineNumberTable"));
        assert_eq!(None, pool.find_utf8("StackMapTable"));
    }
}
