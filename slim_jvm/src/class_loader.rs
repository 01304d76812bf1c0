use crate::vm_error::{VmError, VmExecResult};
use classfile::class_file::ClassFile;
use classfile::class_file_reader::read_buffer;
use log::{info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::rc::Rc;
use zip::result::ZipError;
use zip::ZipArchive;

/// A source of raw class bytes, looked up by fully-qualified name.
pub trait ClassPath {
    fn find_class(&self, class_name: &str) -> VmExecResult<Option<Vec<u8>>>;
}

pub struct FileSystemClassPath {
    class_path_root: PathBuf,
}

impl FileSystemClassPath {
    pub fn new(path: &str) -> VmExecResult<FileSystemClassPath> {
        let class_path_root = fs::canonicalize(PathBuf::from(path))
            .map_err(|_| VmError::ClassPathNotExist(path.to_string()))?;
        if !class_path_root.is_dir() {
            return Err(VmError::ClassPathNotExist(
                class_path_root.to_string_lossy().to_string(),
            ));
        }
        Ok(FileSystemClassPath { class_path_root })
    }
}

impl ClassPath for FileSystemClassPath {
    fn find_class(&self, class_name: &str) -> VmExecResult<Option<Vec<u8>>> {
        let mut full_path = self.class_path_root.clone();
        full_path.push(class_name);
        full_path.set_extension("class");
        if full_path.exists() {
            fs::read(full_path)
                .map(Some)
                .map_err(|e| VmError::ReadClassBytesError(e.to_string()))
        } else {
            Ok(None)
        }
    }
}

/// Jar archives are plain zip files containing `.class` entries.
pub struct JarClassPath {
    jar_file_path: String,
    zip: RefCell<ZipArchive<BufReader<File>>>,
}

impl JarClassPath {
    pub fn new(path: &str) -> VmExecResult<JarClassPath> {
        let jar_file_path = fs::canonicalize(PathBuf::from(path))
            .map_err(|_| VmError::JarFileNotExist(path.to_string()))?;
        let file = File::open(&jar_file_path)
            .map_err(|e| VmError::ReadClassBytesError(e.to_string()))?;
        let zip = ZipArchive::new(BufReader::new(file))
            .map_err(|e| VmError::ReadClassBytesError(e.to_string()))?;
        Ok(JarClassPath {
            jar_file_path: jar_file_path.to_string_lossy().to_string(),
            zip: RefCell::new(zip),
        })
    }

    pub fn path(&self) -> &str {
        &self.jar_file_path
    }
}

impl ClassPath for JarClassPath {
    fn find_class(&self, class_name: &str) -> VmExecResult<Option<Vec<u8>>> {
        let entry_name = class_name.to_string() + ".class";
        match self.zip.borrow_mut().by_name(&entry_name) {
            Ok(mut zip_file) => {
                let mut buffer: Vec<u8> = Vec::with_capacity(zip_file.size() as usize);
                zip_file
                    .read_to_end(&mut buffer)
                    .map_err(|e| VmError::ReadClassBytesError(e.to_string()))?;
                Ok(Some(buffer))
            }
            Err(ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(VmError::ReadClassBytesError(e.to_string())),
        }
    }
}

fn path_suffix(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or("")
}

/// Memoizing resolution boundary: name -> parsed class. Owns every parsed
/// class; the superclass relation is a by-name lookup into this table, so
/// classes never hold owning links to each other.
#[derive(Default)]
pub struct ClassLoader {
    class_paths: Vec<Box<dyn ClassPath>>,
    classes: HashMap<String, Rc<ClassFile>>,
}

impl ClassLoader {
    pub fn new() -> ClassLoader {
        ClassLoader::default()
    }

    pub fn add_class_path(&mut self, class_path: Box<dyn ClassPath>) {
        self.class_paths.push(class_path);
    }

    /// Registers a directory or jar source, dispatching on the suffix.
    pub fn add_path(&mut self, path: &str) -> VmExecResult<()> {
        if path_suffix(path) == "jar" {
            self.add_class_path(Box::new(JarClassPath::new(path)?));
        } else {
            self.add_class_path(Box::new(FileSystemClassPath::new(path)?));
        }
        Ok(())
    }

    /// Inserts a pre-parsed class under its own name.
    pub fn register(&mut self, class: Rc<ClassFile>) {
        if self
            .classes
            .insert(class.name().to_string(), class.clone())
            .is_some()
        {
            warn!("overwriting existing instance of {}", class.name());
        }
    }

    pub fn get(&self, name: &str) -> Option<Rc<ClassFile>> {
        self.classes.get(name).cloned()
    }

    pub fn load_by_name(&mut self, name: &str) -> VmExecResult<Rc<ClassFile>> {
        if let Some(class) = self.classes.get(name) {
            return Ok(class.clone());
        }
        let mut found = None;
        for class_path in &self.class_paths {
            if let Some(bytes) = class_path.find_class(name)? {
                found = Some(bytes);
                break;
            }
        }
        let bytes = found.ok_or_else(|| VmError::ClassNotFoundException(name.to_string()))?;
        let class = Rc::new(read_buffer(&bytes)?);
        info!("loaded {}", class.name());
        self.register(class.clone());
        self.ensure_super_loaded(&class)?;
        Ok(class)
    }

    /// Parses a class file directly from disk and registers it under the
    /// name it declares for itself.
    pub fn load_by_file(&mut self, path: &str) -> VmExecResult<Rc<ClassFile>> {
        let bytes = fs::read(path).map_err(|e| VmError::ReadClassBytesError(e.to_string()))?;
        let class = Rc::new(read_buffer(&bytes)?);
        info!("loaded {} from {}", class.name(), path);
        self.register(class.clone());
        self.ensure_super_loaded(&class)?;
        Ok(class)
    }

    fn ensure_super_loaded(&mut self, class: &Rc<ClassFile>) -> VmExecResult<()> {
        if let Some(super_name) = class.super_class_name().map_err(VmError::from)? {
            self.load_by_name(&super_name)?;
        }
        Ok(())
    }

    /// The only superclass edge in the system.
    pub fn super_class_of(&mut self, class: &ClassFile) -> VmExecResult<Option<Rc<ClassFile>>> {
        match class.super_class_name().map_err(VmError::from)? {
            Some(super_name) => self.load_by_name(&super_name).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_class_path_is_rejected() {
        assert!(FileSystemClassPath::new("./no/such/dir").is_err());
        assert!(JarClassPath::new("./no/such.jar").is_err());
    }

    #[test]
    fn unknown_class_reports_class_not_found() {
        let mut loader = ClassLoader::new();
        assert_eq!(
            Err(VmError::ClassNotFoundException("jx/Missing".to_string())),
            loader.load_by_name("jx/Missing").map(|_| ())
        );
    }

    #[test]
    fn jar_suffix_selects_the_archive_source() {
        assert_eq!("jar", path_suffix("lib/rt.jar"));
        assert_eq!("class", path_suffix("Foo.class"));
        assert_eq!("lib/classes", path_suffix("lib/classes"));
    }
}
