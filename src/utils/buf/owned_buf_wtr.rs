use super::{buf_wtr::Error, BufWtr};

#[derive(Debug)]
pub struct OwnedBufWtr {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl OwnedBufWtr {
    #[inline]
    fn check_rep(&self) {
        assert!(self.start <= self.end);
        assert!(self.end <= self.buf.len());
    }

    pub fn from_bytes(buf: Vec<u8>, start: usize, end: usize) -> Self {
        let this = Self { buf, start, end };
        this.check_rep();
        this
    }

    pub fn new(len: usize, start: usize) -> Self {
        let this = Self {
            buf: vec![0; len],
            start,
            end: start,
        };
        this.check_rep();
        this
    }

    /// Consumes the writer and returns exactly the data region.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buf.truncate(self.end);
        self.buf.drain(..self.start);
        self.buf
    }
}

impl BufWtr for OwnedBufWtr {
    #[inline]
    fn data_len(&self) -> usize {
        self.end - self.start
    }
    #[inline]
    fn front_len(&self) -> usize {
        self.start
    }
    #[inline]
    fn back_len(&self) -> usize {
        self.buf.len() - self.end
    }
    #[inline]
    fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }
    #[inline]
    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..self.end]
    }
    #[inline]
    fn back_free_space(&mut self) -> &mut [u8] {
        &mut self.buf[self.end..]
    }
    #[inline]
    fn grow_front(&mut self, len: usize) -> Result<(), Error> {
        if self.start < len {
            return Err(Error::NotEnoughSpace);
        }
        self.start -= len;
        self.check_rep();
        Ok(())
    }
    #[inline]
    fn grow_back(&mut self, len: usize) -> Result<(), Error> {
        if self.buf.len() < self.end + len {
            return Err(Error::NotEnoughSpace);
        }
        self.end += len;
        self.check_rep();
        Ok(())
    }
}
