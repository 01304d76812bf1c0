//! In-test class assembler. Builds real class-file bytes so interpreter
//! tests can run against classes with known bytecode, without fixture
//! files on disk.

use classfile::class_file::ClassFile;
use classfile::class_file_reader::read_buffer;
use slim_jvm::interpreter::Interpreter;
use std::collections::HashMap;
use std::rc::Rc;

const CLASS_FILE_MAGIC: u32 = 0xCAFEBABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;

#[derive(Default)]
pub struct ClassAssembler {
    pool_bytes: Vec<u8>,
    next_index: u16,
    utf8_cache: HashMap<String, u16>,
    class_cache: HashMap<String, u16>,
    this_class: u16,
    super_class: u16,
    field_count: u16,
    field_bytes: Vec<u8>,
    method_count: u16,
    method_bytes: Vec<u8>,
}

impl ClassAssembler {
    pub fn new(name: &str, super_name: Option<&str>) -> ClassAssembler {
        let mut assembler = ClassAssembler {
            next_index: 1,
            ..ClassAssembler::default()
        };
        assembler.this_class = assembler.class_const(name);
        assembler.super_class = match super_name {
            Some(super_name) => assembler.class_const(super_name),
            None => 0,
        };
        assembler
    }

    fn push_entry(&mut self, bytes: &[u8], two_slots: bool) -> u16 {
        let index = self.next_index;
        self.pool_bytes.extend_from_slice(bytes);
        self.next_index += if two_slots { 2 } else { 1 };
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        if let Some(&index) = self.utf8_cache.get(text) {
            return index;
        }
        let mut bytes = vec![1];
        bytes.extend_from_slice(&(text.len() as u16).to_be_bytes());
        bytes.extend_from_slice(text.as_bytes());
        let index = self.push_entry(&bytes, false);
        self.utf8_cache.insert(text.to_string(), index);
        index
    }

    pub fn class_const(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.class_cache.get(name) {
            return index;
        }
        let name_index = self.utf8(name);
        let mut bytes = vec![7];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        let index = self.push_entry(&bytes, false);
        self.class_cache.insert(name.to_string(), index);
        index
    }

    pub fn int_const(&mut self, value: i32) -> u16 {
        let mut bytes = vec![3];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.push_entry(&bytes, false)
    }

    pub fn long_const(&mut self, value: i64) -> u16 {
        let mut bytes = vec![5];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.push_entry(&bytes, true)
    }

    pub fn string_const(&mut self, text: &str) -> u16 {
        let utf8_index = self.utf8(text);
        let mut bytes = vec![8];
        bytes.extend_from_slice(&utf8_index.to_be_bytes());
        self.push_entry(&bytes, false)
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut bytes = vec![12];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        bytes.extend_from_slice(&descriptor_index.to_be_bytes());
        self.push_entry(&bytes, false)
    }

    fn member_ref(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        let mut bytes = vec![tag];
        bytes.extend_from_slice(&class_index.to_be_bytes());
        bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
        self.push_entry(&bytes, false)
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(9, class, name, descriptor)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(10, class, name, descriptor)
    }

    pub fn add_field(&mut self, access: u16, name: &str, descriptor: &str) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.field_bytes.extend_from_slice(&access.to_be_bytes());
        self.field_bytes.extend_from_slice(&name_index.to_be_bytes());
        self.field_bytes
            .extend_from_slice(&descriptor_index.to_be_bytes());
        self.field_bytes.extend_from_slice(&0u16.to_be_bytes());
        self.field_count += 1;
    }

    pub fn add_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
    ) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let code_name_index = self.utf8("Code");
        self.method_bytes.extend_from_slice(&access.to_be_bytes());
        self.method_bytes.extend_from_slice(&name_index.to_be_bytes());
        self.method_bytes
            .extend_from_slice(&descriptor_index.to_be_bytes());
        self.method_bytes.extend_from_slice(&1u16.to_be_bytes());
        self.method_bytes
            .extend_from_slice(&code_name_index.to_be_bytes());
        let attribute_len = 12 + code.len() as u32;
        self.method_bytes
            .extend_from_slice(&attribute_len.to_be_bytes());
        self.method_bytes.extend_from_slice(&max_stack.to_be_bytes());
        self.method_bytes
            .extend_from_slice(&max_locals.to_be_bytes());
        self.method_bytes
            .extend_from_slice(&(code.len() as u32).to_be_bytes());
        self.method_bytes.extend_from_slice(code);
        self.method_bytes.extend_from_slice(&0u16.to_be_bytes()); // exception table
        self.method_bytes.extend_from_slice(&0u16.to_be_bytes()); // code attributes
        self.method_count += 1;
    }

    pub fn add_native_method(&mut self, access: u16, name: &str, descriptor: &str) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.method_bytes
            .extend_from_slice(&(access | ACC_NATIVE).to_be_bytes());
        self.method_bytes.extend_from_slice(&name_index.to_be_bytes());
        self.method_bytes
            .extend_from_slice(&descriptor_index.to_be_bytes());
        self.method_bytes.extend_from_slice(&0u16.to_be_bytes());
        self.method_count += 1;
    }

    pub fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&CLASS_FILE_MAGIC.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // minor
        out.extend_from_slice(&52u16.to_be_bytes()); // major
        out.extend_from_slice(&self.next_index.to_be_bytes());
        out.extend_from_slice(&self.pool_bytes);
        out.extend_from_slice(&0x0021u16.to_be_bytes()); // public super
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // interfaces
        out.extend_from_slice(&self.field_count.to_be_bytes());
        out.extend_from_slice(&self.field_bytes);
        out.extend_from_slice(&self.method_count.to_be_bytes());
        out.extend_from_slice(&self.method_bytes);
        out.extend_from_slice(&0u16.to_be_bytes()); // class attributes
        out
    }
}

pub fn register_class(interpreter: &mut Interpreter, assembler: &ClassAssembler) -> Rc<ClassFile> {
    let class = Rc::new(read_buffer(&assembler.assemble()).expect("assembled class must parse"));
    interpreter.class_loader_mut().register(class.clone());
    class
}

/// Minimal stand-ins for the handful of runtime classes the interpreter
/// itself touches: Object, String (char-array backed) and Class.
pub fn register_core_classes(interpreter: &mut Interpreter) {
    let mut object = ClassAssembler::new("java/lang/Object", None);
    object.add_method(ACC_PUBLIC, "<init>", "()V", 0, 1, &[0xb1]);
    object.add_native_method(ACC_PUBLIC, "hashCode", "()I");
    register_class(interpreter, &object);

    let mut string = ClassAssembler::new("java/lang/String", Some("java/lang/Object"));
    string.add_field(ACC_PRIVATE, "value", "[C");
    let value_ref = string.field_ref("java/lang/String", "value", "[C");
    // aload_0, aload_1, putfield value, return
    let mut init_code = vec![0x2a, 0x2b, 0xb5];
    init_code.extend_from_slice(&value_ref.to_be_bytes());
    init_code.push(0xb1);
    string.add_method(ACC_PUBLIC, "<init>", "([C)V", 2, 2, &init_code);
    register_class(interpreter, &string);

    let class = ClassAssembler::new("java/lang/Class", Some("java/lang/Object"));
    register_class(interpreter, &class);
}
