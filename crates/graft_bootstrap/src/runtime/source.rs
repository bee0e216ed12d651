//! Where class images come from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use graft_classfile::{class_path, encode, ClassFile, ClassFormatError, CLASS_EXTENSION};

use super::RuntimeError;

/// A read-only provider of class images.
pub trait ClassSource: Send + Sync {
    /// Human readable location for logs and errors.
    fn location(&self) -> String;

    /// Whether this source has an image for `name`.
    fn contains(&self, name: &str) -> bool;

    /// Reads the image for `name`, or `None` if absent.
    fn read(&self, name: &str) -> Result<Option<Arc<[u8]>>, RuntimeError>;

    /// Names of every class in this source, sorted.
    fn class_names(&self) -> Result<Vec<String>, RuntimeError>;
}

/// Class images held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryClassSource {
    label: String,
    classes: BTreeMap<String, Arc<[u8]>>,
}

impl MemoryClassSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            classes: BTreeMap::new(),
        }
    }

    /// Adds raw image bytes under `name`.
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.classes.insert(name.into(), bytes.into());
    }

    /// Encodes and adds a class.
    pub fn insert_class(&mut self, class: &ClassFile) -> Result<(), ClassFormatError> {
        let bytes = encode(class)?;
        self.insert(class.name.clone(), bytes);
        Ok(())
    }

    /// Builder-style variant of [`MemoryClassSource::insert_class`].
    pub fn with_class(mut self, class: &ClassFile) -> Result<Self, ClassFormatError> {
        self.insert_class(class)?;
        Ok(self)
    }
}

impl ClassSource for MemoryClassSource {
    fn location(&self) -> String {
        format!("memory:{}", self.label)
    }

    fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    fn read(&self, name: &str) -> Result<Option<Arc<[u8]>>, RuntimeError> {
        Ok(self.classes.get(name).cloned())
    }

    fn class_names(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.classes.keys().cloned().collect())
    }
}

/// Class images stored as `.gclass` files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryClassSource {
    root: PathBuf,
}

impl DirectoryClassSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect(&self, dir: &Path, names: &mut Vec<String>) -> Result<(), RuntimeError> {
        let entries = std::fs::read_dir(dir).map_err(|e| self.io_error("*", e))?;
        for entry in entries {
            let path = entry.map_err(|e| self.io_error("*", e))?.path();
            if path.is_dir() {
                self.collect(&path, names)?;
            } else if path.extension().is_some_and(|ext| ext == CLASS_EXTENSION) {
                if let Ok(relative) = path.with_extension("").strip_prefix(&self.root) {
                    let name = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    names.push(name);
                }
            }
        }
        Ok(())
    }

    fn io_error(&self, class: &str, error: std::io::Error) -> RuntimeError {
        RuntimeError::SourceRead {
            class: class.to_string(),
            location: self.location(),
            message: error.to_string(),
        }
    }
}

impl ClassSource for DirectoryClassSource {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn contains(&self, name: &str) -> bool {
        self.root.join(class_path(name)).is_file()
    }

    fn read(&self, name: &str) -> Result<Option<Arc<[u8]>>, RuntimeError> {
        let path = self.root.join(class_path(name));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes.into())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(name, e)),
        }
    }

    fn class_names(&self) -> Result<Vec<String>, RuntimeError> {
        let mut names = Vec::new();
        if self.root.is_dir() {
            self.collect(&self.root, &mut names)?;
        }
        names.sort();
        Ok(names)
    }
}
