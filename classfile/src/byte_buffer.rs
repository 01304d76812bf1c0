use crate::error::{ClassFileError, Result};

/// Sequential big-endian cursor over an immutable byte source.
pub struct ByteBuffer<'a> {
    buffer: &'a [u8],
    pub position: usize,
}

impl<'a> ByteBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteBuffer {
            buffer: data,
            position: 0,
        }
    }

    fn advance(&mut self, size: usize) -> Result<&'a [u8]> {
        if self.position + size > self.buffer.len() {
            Err(ClassFileError::UnexpectedEndOfData)
        } else {
            let slice = &self.buffer[self.position..self.position + size];
            self.position += size;
            Ok(slice)
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.advance(std::mem::size_of::<u8>())
            .map(|bytes| u8::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.advance(std::mem::size_of::<u16>())
            .map(|bytes| u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.advance(std::mem::size_of::<u32>())
            .map(|bytes| u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.advance(std::mem::size_of::<i32>())
            .map(|bytes| i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.advance(std::mem::size_of::<i64>())
            .map(|bytes| i64::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.advance(std::mem::size_of::<f32>())
            .map(|bytes| f32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.advance(std::mem::size_of::<f64>())
            .map(|bytes| f64::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.advance(len)
    }

    /// Appends the next `len` bytes to `sink` and returns the offset they
    /// were inserted at. Used to build the attribute/UTF8 side buffers.
    pub fn read_into(&mut self, len: usize, sink: &mut Vec<u8>) -> Result<usize> {
        let offset = sink.len();
        let bytes = self.advance(len)?;
        sink.extend_from_slice(bytes);
        Ok(offset)
    }

    pub fn has_more_data(&self) -> bool {
        self.position < self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_works() {
        let data = vec![0x00, 0x00, 0x00, 0x42];
        let mut buffer = ByteBuffer::new(&data);
        assert!(buffer.has_more_data());
        assert_eq!(0x42u32, buffer.read_u32().unwrap());
        assert!(!buffer.has_more_data());
        assert!(buffer.read_u32().is_err());
    }

    #[test]
    fn big_endian_and_signed_reads() {
        let data = vec![0xCA, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut buffer = ByteBuffer::new(&data);
        assert_eq!(0xCAFE, buffer.read_u16().unwrap());
        assert_eq!(-1, buffer.read_i32().unwrap());
    }

    #[test]
    fn read_into_returns_insertion_offset() {
        let data = vec![1, 2, 3, 4, 5];
        let mut buffer = ByteBuffer::new(&data);
        let mut sink = vec![9, 9];
        let offset = buffer.read_into(3, &mut sink).unwrap();
        assert_eq!(2, offset);
        assert_eq!(vec![9, 9, 1, 2, 3], sink);
        assert!(buffer.read_into(3, &mut sink).is_err());
    }
}
