//! Storage primitives backing the address space
//!
//! `Ram` cells are atomics so that the processor, picture unit and audio
//! unit threads can share them without a lock. Every access is relaxed:
//! each shared field has a single conventional writer (see `system`).

use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Backing store access errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("offset {offset:#06X} is outside a {size:#06X} byte store")]
    OutOfBounds { offset: u16, size: usize },
}

/// Mutable fixed-size byte buffer
#[derive(Debug)]
pub struct Ram {
    cells: Box<[AtomicU8]>,
}

impl Ram {
    /// Create a zero-filled RAM of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            cells: (0..size).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Direct handle to one cell
    pub fn cell(&self, offset: u16) -> Result<&AtomicU8, MemoryError> {
        self.cells
            .get(offset as usize)
            .ok_or(MemoryError::OutOfBounds {
                offset,
                size: self.cells.len(),
            })
    }

    pub fn read(&self, offset: u16) -> Result<u8, MemoryError> {
        Ok(self.cell(offset)?.load(Ordering::Relaxed))
    }

    pub fn write(&self, offset: u16, value: u8) -> Result<(), MemoryError> {
        self.cell(offset)?.store(value, Ordering::Relaxed);
        Ok(())
    }

    /// Copy of the whole buffer
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }
}

/// Immutable fixed-size byte buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rom {
    data: Box<[u8]>,
}

impl Rom {
    pub fn new(data: impl Into<Box<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read(&self, offset: u16) -> Result<u8, MemoryError> {
        self.data
            .get(offset as usize)
            .copied()
            .ok_or(MemoryError::OutOfBounds {
                offset,
                size: self.data.len(),
            })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
