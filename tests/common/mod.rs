//! Common test utilities and helpers.
//!
//! Synthetic PE images with a valid stored checksum, so the integrity guard
//! accepts them as-is.

#![allow(dead_code)]

use pepatch::checksum::image_checksum;
use std::path::{Path, PathBuf};

pub const NT_OFFSET: usize = 0x80;
pub const OPTIONAL_OFFSET: usize = NT_OFFSET + 24;
pub const CHECKSUM_OFFSET: usize = OPTIONAL_OFFSET + 64;

pub const MACHINE_I386: u16 = 0x014C;
pub const MACHINE_AMD64: u16 = 0x8664;

/// Builder for minimal PE images.
#[derive(Debug, Clone)]
pub struct PeBuilder {
    machine: u16,
    pe32plus: bool,
    body_len: usize,
    words: Vec<(usize, u64)>,
    certificates: Vec<u32>,
}

impl PeBuilder {
    pub fn pe32plus() -> Self {
        Self {
            machine: MACHINE_AMD64,
            pe32plus: true,
            body_len: 0x400,
            words: Vec::new(),
            certificates: Vec::new(),
        }
    }

    pub fn pe32() -> Self {
        Self {
            machine: MACHINE_I386,
            pe32plus: false,
            ..Self::pe32plus()
        }
    }

    pub fn body_len(mut self, len: usize) -> Self {
        self.body_len = len;
        self
    }

    /// Places `value` at `offset` of the body.
    pub fn word(mut self, offset: usize, value: u64) -> Self {
        self.words.push((offset, value));
        self
    }

    /// Appends a WIN_CERTIFICATE record of `length` bytes at end of file.
    pub fn certificate(mut self, length: u32) -> Self {
        self.certificates.push(length);
        self
    }

    pub fn security_entry_offset(&self) -> usize {
        let directories = if self.pe32plus { 112 } else { 96 };
        OPTIONAL_OFFSET + directories + 4 * 8
    }

    pub fn build(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.body_len];
        data[0..2].copy_from_slice(b"MZ");
        put_u32(&mut data, 60, NT_OFFSET as u32);
        data[NT_OFFSET..NT_OFFSET + 4].copy_from_slice(b"PE\0\0");
        put_u16(&mut data, NT_OFFSET + 4, self.machine);
        let (magic, optional_size, directories) = if self.pe32plus {
            (0x20Bu16, 240u16, 112)
        } else {
            (0x10B, 224, 96)
        };
        put_u16(&mut data, NT_OFFSET + 20, optional_size);
        put_u16(&mut data, OPTIONAL_OFFSET, magic);
        put_u32(&mut data, OPTIONAL_OFFSET + directories - 4, 16);

        for &(offset, value) in &self.words {
            data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        }

        if !self.certificates.is_empty() {
            let table_start = data.len();
            for &length in &self.certificates {
                let start = data.len();
                data.extend_from_slice(&length.to_le_bytes());
                data.extend_from_slice(&0x0200u16.to_le_bytes());
                data.extend_from_slice(&0x0002u16.to_le_bytes());
                data.resize(start + length as usize, 0xCC);
                data.resize((data.len() + 7) & !7, 0);
            }
            let entry = self.security_entry_offset();
            put_u32(&mut data, entry, table_start as u32);
            let size = (data.len() - table_start) as u32;
            put_u32(&mut data, entry + 4, size);
        }

        let sum = image_checksum(&data).expect("fixture headers parse");
        put_u32(&mut data, CHECKSUM_OFFSET, sum);
        data
    }

    /// Writes the image into `dir` and returns its path.
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("write fixture");
        path
    }
}

pub fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn stored_checksum(data: &[u8]) -> u32 {
    u32::from_le_bytes(
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4]
            .try_into()
            .expect("4 bytes"),
    )
}

pub fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"))
}
