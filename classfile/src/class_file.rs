use crate::access_flags::{ClassAccessFlags, MethodAccessFlags};
use crate::attribute_info::{AttributeInfo, CodeAttribute};
use crate::constant_pool::{ConstantPool, ConstantPoolEntry, ConstantPoolIndex};
use crate::error::{ClassFileError, Result};
use crate::field_info::{FieldInfo, FieldSummary};
use crate::method_info::MethodInfo;

const MAX_CODE_LENGTH: usize = 65536;

/// Fully-qualified symbolic reference to a method, resolved from the
/// constant pool of the referencing class.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodReference {
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldReference {
    pub class_name: String,
    pub field_name: String,
    pub descriptor: String,
}

/// Parsed, queryable representation of one class.
#[derive(Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ConstantPoolIndex,
    pub super_class: ConstantPoolIndex,
    pub interfaces: Vec<ConstantPoolIndex>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
    pub attribute_bytes: Vec<u8>,
    name: String,
    code_name_index: Option<ConstantPoolIndex>,
}

impl ClassFile {
    pub(crate) fn resolve(
        minor_version: u16,
        major_version: u16,
        constant_pool: ConstantPool,
        access_flags: ClassAccessFlags,
        this_class: ConstantPoolIndex,
        super_class: ConstantPoolIndex,
        interfaces: Vec<ConstantPoolIndex>,
        fields: Vec<FieldInfo>,
        methods: Vec<MethodInfo>,
        attributes: Vec<AttributeInfo>,
        attribute_bytes: Vec<u8>,
    ) -> Result<ClassFile> {
        let name = constant_pool.class_name(this_class)?;
        let code_name_index = constant_pool.find_utf8("Code");
        Ok(ClassFile {
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
            name,
            code_name_index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// None only for the root of the hierarchy (`java/lang/Object`).
    pub fn super_class_name(&self) -> Result<Option<String>> {
        if self.super_class == 0 {
            Ok(None)
        } else {
            self.constant_pool.class_name(self.super_class).map(Some)
        }
    }

    pub fn interface_names(&self) -> Result<Vec<String>> {
        self.interfaces
            .iter()
            .map(|index| self.constant_pool.class_name(*index))
            .collect()
    }

    pub fn method_name(&self, method: &MethodInfo) -> Result<String> {
        self.constant_pool.utf8(method.name_index)
    }

    pub fn method_descriptor(&self, method: &MethodInfo) -> Result<String> {
        self.constant_pool.utf8(method.descriptor_index)
    }

    pub fn main_method(&self) -> Option<&MethodInfo> {
        self.method_with_name(
            "main",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        )
    }

    pub fn clinit(&self) -> Option<&MethodInfo> {
        self.method_with_name("<clinit>", MethodAccessFlags::STATIC)
    }

    /// First declared method matching `name` and carrying all of
    /// `required_flags`.
    pub fn method_with_name(
        &self,
        name: &str,
        required_flags: MethodAccessFlags,
    ) -> Option<&MethodInfo> {
        self.methods.iter().find(|method| {
            method.access_flags.contains(required_flags)
                && self
                    .method_name(method)
                    .map(|method_name| method_name == name)
                    .unwrap_or(false)
        })
    }

    pub fn method_with_signature(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|method| {
            self.method_name(method)
                .map(|method_name| method_name == name)
                .unwrap_or(false)
                && self
                    .method_descriptor(method)
                    .map(|method_descriptor| method_descriptor == descriptor)
                    .unwrap_or(false)
        })
    }

    pub fn field_with_name(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|field| {
            self.constant_pool
                .utf8(field.name_index)
                .map(|field_name| field_name == name)
                .unwrap_or(false)
        })
    }

    /// Snapshot of every declared field, in declaration order.
    pub fn field_summaries(&self) -> Result<Vec<FieldSummary>> {
        self.fields
            .iter()
            .map(|field| {
                Ok(FieldSummary {
                    name: self.constant_pool.utf8(field.name_index)?,
                    descriptor: self.constant_pool.utf8(field.descriptor_index)?,
                    is_static: field.is_static(),
                    is_private: field.is_private(),
                })
            })
            .collect()
    }

    /// Extracts the executable body of `method` from its Code attribute.
    pub fn code_for_method(&self, method: &MethodInfo) -> Result<CodeAttribute> {
        let method_name = self.method_name(method)?;
        if method.is_native() {
            return Err(ClassFileError::NativeMethodHasNoCode(method_name));
        }
        let code_attribute = method
            .attributes
            .iter()
            .find(|attribute| Some(attribute.name_index) == self.code_name_index)
            .ok_or(ClassFileError::MissingCodeAttribute(method_name.clone()))?;
        let body = &self.attribute_bytes[code_attribute.offset..code_attribute.offset + code_attribute.len];
        let code = CodeAttribute::parse(body)?;
        if code.code.len() > MAX_CODE_LENGTH {
            return Err(ClassFileError::CodeTooLong(method_name));
        }
        Ok(code)
    }

    pub fn find_class(&self, index: ConstantPoolIndex) -> Result<String> {
        self.constant_pool.class_name(index)
    }

    pub fn find_method(&self, index: ConstantPoolIndex) -> Result<MethodReference> {
        match self.constant_pool.entry(index)? {
            ConstantPoolEntry::MethodReference(class_index, name_and_type_index) => {
                self.method_reference(*class_index, *name_and_type_index)
            }
            _ => Err(ClassFileError::UnexpectedConstantKind(index, "Methodref")),
        }
    }

    pub fn find_interface_method(&self, index: ConstantPoolIndex) -> Result<MethodReference> {
        match self.constant_pool.entry(index)? {
            ConstantPoolEntry::InterfaceMethodReference(class_index, name_and_type_index) => {
                self.method_reference(*class_index, *name_and_type_index)
            }
            _ => Err(ClassFileError::UnexpectedConstantKind(
                index,
                "InterfaceMethodref",
            )),
        }
    }

    fn method_reference(
        &self,
        class_index: ConstantPoolIndex,
        name_and_type_index: ConstantPoolIndex,
    ) -> Result<MethodReference> {
        let class_name = self.constant_pool.class_name(class_index)?;
        let (method_name, descriptor) = self.constant_pool.name_and_type(name_and_type_index)?;
        Ok(MethodReference {
            class_name,
            method_name,
            descriptor,
        })
    }

    pub fn find_field_ref(&self, index: ConstantPoolIndex) -> Result<FieldReference> {
        match self.constant_pool.entry(index)? {
            ConstantPoolEntry::FieldReference(class_index, name_and_type_index) => {
                let class_name = self.constant_pool.class_name(*class_index)?;
                let (field_name, descriptor) =
                    self.constant_pool.name_and_type(*name_and_type_index)?;
                Ok(FieldReference {
                    class_name,
                    field_name,
                    descriptor,
                })
            }
            _ => Err(ClassFileError::UnexpectedConstantKind(index, "Fieldref")),
        }
    }
}
