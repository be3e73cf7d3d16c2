//! Big-endian primitive decoding and encoding for class-file images.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use std::io::Cursor;

use crate::error::ParseError;

/// Cursor-style reader over a class-file byte buffer. Every accessor
/// returns the decoded value and advances; running off the end yields
/// `ParseError::TruncatedInput` rather than a short read.
pub struct ClassReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ClassReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len();
        len.saturating_sub(self.position())
    }

    fn check(&self, needed: usize) -> Result<(), ParseError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(ParseError::TruncatedInput { needed, remaining });
        }
        Ok(())
    }

    pub fn u1(&mut self) -> Result<u8, ParseError> {
        self.check(1)?;
        Ok(self.cursor.read_u8().unwrap())
    }

    pub fn u2(&mut self) -> Result<u16, ParseError> {
        self.check(2)?;
        Ok(self.cursor.read_u16::<BigEndian>().unwrap())
    }

    pub fn u4(&mut self) -> Result<u32, ParseError> {
        self.check(4)?;
        Ok(self.cursor.read_u32::<BigEndian>().unwrap())
    }

    pub fn s1(&mut self) -> Result<i8, ParseError> {
        self.check(1)?;
        Ok(self.cursor.read_i8().unwrap())
    }

    pub fn s2(&mut self) -> Result<i16, ParseError> {
        self.check(2)?;
        Ok(self.cursor.read_i16::<BigEndian>().unwrap())
    }

    pub fn s4(&mut self) -> Result<i32, ParseError> {
        self.check(4)?;
        Ok(self.cursor.read_i32::<BigEndian>().unwrap())
    }

    pub fn s8(&mut self) -> Result<i64, ParseError> {
        self.check(8)?;
        Ok(self.cursor.read_i64::<BigEndian>().unwrap())
    }

    pub fn f4(&mut self) -> Result<f32, ParseError> {
        self.check(4)?;
        Ok(self.cursor.read_f32::<BigEndian>().unwrap())
    }

    pub fn f8(&mut self) -> Result<f64, ParseError> {
        self.check(8)?;
        Ok(self.cursor.read_f64::<BigEndian>().unwrap())
    }

    pub fn bytes(&mut self, count: usize) -> Result<Vec<u8>, ParseError> {
        self.check(count)?;
        let start = self.position();
        let slice = &self.cursor.get_ref()[start..start + count];
        let out = slice.to_vec();
        self.cursor.set_position((start + count) as u64);
        Ok(out)
    }
}

/// The encoding mirror of `ClassReader`, used by serialisation and by
/// tests constructing synthetic class images.
#[derive(Default)]
pub struct ClassWriter {
    buffer: Vec<u8>,
}

impl ClassWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u1(&mut self, value: u8) {
        self.buffer.write_u8(value).unwrap();
    }

    pub fn put_u2(&mut self, value: u16) {
        self.buffer.write_u16::<BigEndian>(value).unwrap();
    }

    pub fn put_u4(&mut self, value: u32) {
        self.buffer.write_u32::<BigEndian>(value).unwrap();
    }

    pub fn put_s2(&mut self, value: i16) {
        self.buffer.write_i16::<BigEndian>(value).unwrap();
    }

    pub fn put_s4(&mut self, value: i32) {
        self.buffer.write_i32::<BigEndian>(value).unwrap();
    }

    pub fn put_s8(&mut self, value: i64) {
        self.buffer.write_i64::<BigEndian>(value).unwrap();
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}
