pub mod access_flags;
pub mod attribute_info;
pub mod byte_buffer;
pub mod class_file;
pub mod class_file_reader;
pub mod constant_pool;
pub mod error;
pub mod field_info;
pub mod method_info;
