//! Bounds-checked field access for PE images

/// Extension trait for reading primitive types from byte slices
pub trait ReadExt {
    fn read_u16_le_at(&self, offset: usize) -> Option<u16>;
    fn read_u32_le_at(&self, offset: usize) -> Option<u32>;
    fn read_u64_le_at(&self, offset: usize) -> Option<u64>;
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]>;
}

impl ReadExt for [u8] {
    #[inline(always)]
    fn read_u16_le_at(&self, offset: usize) -> Option<u16> {
        self.get(offset..offset.checked_add(2)?)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_le_bytes)
    }

    #[inline(always)]
    fn read_u32_le_at(&self, offset: usize) -> Option<u32> {
        self.get(offset..offset.checked_add(4)?)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    }

    #[inline(always)]
    fn read_u64_le_at(&self, offset: usize) -> Option<u64> {
        self.get(offset..offset.checked_add(8)?)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
    }

    #[inline(always)]
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.get(offset..offset.checked_add(len)?)
    }
}

/// Counterpart of [`ReadExt`] for in-place header edits.
///
/// Writes return `None` without touching the buffer when the field would
/// extend past its end.
pub trait WriteExt {
    fn write_u32_le_at(&mut self, offset: usize, value: u32) -> Option<()>;
    fn fill_at(&mut self, offset: usize, len: usize, byte: u8) -> Option<()>;
}

impl WriteExt for [u8] {
    #[inline(always)]
    fn write_u32_le_at(&mut self, offset: usize, value: u32) -> Option<()> {
        let field = self.get_mut(offset..offset.checked_add(4)?)?;
        field.copy_from_slice(&value.to_le_bytes());
        Some(())
    }

    fn fill_at(&mut self, offset: usize, len: usize, byte: u8) -> Option<()> {
        self.get_mut(offset..offset.checked_add(len)?)?.fill(byte);
        Some(())
    }
}
