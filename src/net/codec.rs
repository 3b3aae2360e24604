//! Bounds-checked little-endian byte cursors
//!
//! `ByteWriter` writes into a caller-provided slice (a pooled buffer) and
//! never grows it; every write returns `None` once the slice is full.

/// Cursor writing into a fixed slice
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    position: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, position: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Total size of the underlying slice
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.position
    }

    #[inline]
    pub fn fits(&self, n: usize) -> bool {
        n <= self.remaining()
    }

    /// Write raw bytes
    pub fn write(&mut self, data: &[u8]) -> Option<()> {
        let end = self.position.checked_add(data.len())?;
        self.buf.get_mut(self.position..end)?.copy_from_slice(data);
        self.position = end;
        Some(())
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) -> Option<()> {
        self.write(&[value])
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) -> Option<()> {
        self.write(&value.to_le_bytes())
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Option<()> {
        self.write(&value.to_le_bytes())
    }

    #[inline]
    pub fn write_f32(&mut self, value: f32) -> Option<()> {
        self.write(&value.to_le_bytes())
    }

    /// Overwrite a u16 written earlier (e.g. a record count)
    pub fn patch_u16(&mut self, at: usize, value: u16) -> Option<()> {
        self.buf.get_mut(at..at + 2)?.copy_from_slice(&value.to_le_bytes());
        Some(())
    }

    /// Bytes written so far
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.position]
    }
}

/// Cursor reading from a byte slice
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read n bytes
    pub fn read(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(n)?;
        let slice = self.data.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read(1).map(|b| b[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> Option<u16> {
        self.read(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        self.read(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline]
    pub fn read_f32(&mut self) -> Option<f32> {
        self.read(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
