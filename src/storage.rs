// src/storage.rs - Program files the controller can list, select and stream
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No such file: {0}")]
    NotFound(String),
    #[error("Invalid file name: {0}")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    #[serde(rename = "fileName")]
    pub name: String,
    pub size: u64,
}

/// An open program, read one byte at a time by the G-code reader.
pub trait ProgramFile: Send {
    fn name(&self) -> &str;
    fn read_byte(&mut self) -> Option<u8>;
    fn seek(&mut self, position: u64) -> Result<(), StorageError>;
    fn position(&self) -> u64;
    fn size(&self) -> u64;

    fn available(&self) -> bool {
        self.position() < self.size()
    }
}

/// A flat directory of programs.
pub trait ProgramStore: Send {
    fn list(&self) -> Result<Vec<FileInfo>, StorageError>;
    fn open(&self, name: &str) -> Result<Box<dyn ProgramFile>, StorageError>;
    fn remove(&mut self, name: &str) -> Result<(), StorageError>;

    fn info(&self, name: &str) -> Result<FileInfo, StorageError> {
        let file = self.open(name)?;
        Ok(FileInfo {
            name: file.name().to_string(),
            size: file.size(),
        })
    }
}

fn check_name(name: &str) -> Result<(), StorageError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Programs stored as files in one host directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        check_name(name)?;
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Ok(path)
    }
}

impl ProgramStore for DirStore {
    fn list(&self) -> Result<Vec<FileInfo>, StorageError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push(FileInfo {
                    name: name.to_string(),
                    size: metadata.len(),
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn open(&self, name: &str) -> Result<Box<dyn ProgramFile>, StorageError> {
        let path = self.path(name)?;
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        tracing::info!("Opened program {} ({} bytes)", path.display(), size);
        Ok(Box::new(DirFile {
            name: name.to_string(),
            reader: BufReader::new(file),
            position: 0,
            size,
        }))
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        let path = self.path(name)?;
        fs::remove_file(&path)?;
        tracing::info!("Deleted program {}", path.display());
        Ok(())
    }
}

struct DirFile {
    name: String,
    reader: BufReader<File>,
    position: u64,
    size: u64,
}

impl ProgramFile for DirFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte) {
            Ok(1) => {
                self.position += 1;
                Some(byte[0])
            }
            Ok(_) => None,
            Err(e) => {
                tracing::error!("Read error in {}: {}", self.name, e);
                None
            }
        }
    }

    fn seek(&mut self, position: u64) -> Result<(), StorageError> {
        let position = position.min(self.size);
        self.reader.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Programs held in memory. Handy for tests and scripted demos.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(name.to_string(), contents.into());
    }

    pub fn with(mut self, name: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(name, contents);
        self
    }
}

impl ProgramStore for MemoryStore {
    fn list(&self) -> Result<Vec<FileInfo>, StorageError> {
        Ok(self
            .files
            .iter()
            .map(|(name, data)| FileInfo {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    fn open(&self, name: &str) -> Result<Box<dyn ProgramFile>, StorageError> {
        check_name(name)?;
        let data = self
            .files
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(Box::new(MemoryFile {
            name: name.to_string(),
            data: data.clone(),
            position: 0,
        }))
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        self.files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }
}

struct MemoryFile {
    name: String,
    data: Vec<u8>,
    position: u64,
}

impl ProgramFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_byte(&mut self) -> Option<u8> {
        let byte = self.data.get(self.position as usize).copied()?;
        self.position += 1;
        Some(byte)
    }

    fn seek(&mut self, position: u64) -> Result<(), StorageError> {
        self.position = position.min(self.size());
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
