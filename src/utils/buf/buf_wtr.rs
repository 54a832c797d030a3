use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("not enough space in buffer")]
    NotEnoughSpace,
}

/// A byte buffer with free space on both ends of its data region.
///
/// Outbound frames are built innermost layer first: the payload is appended and
/// every header is then prepended into the front headroom.
pub trait BufWtr {
    fn data_len(&self) -> usize;
    fn front_len(&self) -> usize;
    fn back_len(&self) -> usize;
    fn data(&self) -> &[u8];
    fn data_mut(&mut self) -> &mut [u8];
    fn back_free_space(&mut self) -> &mut [u8];
    fn grow_front(&mut self, len: usize) -> Result<(), Error>;
    fn grow_back(&mut self, len: usize) -> Result<(), Error>;

    #[inline]
    fn append(&mut self, n: &[u8]) -> Result<(), Error> {
        if self.back_len() < n.len() {
            return Err(Error::NotEnoughSpace);
        }
        self.back_free_space()[..n.len()].copy_from_slice(n);
        self.grow_back(n.len())
    }

    #[inline]
    fn prepend(&mut self, n: &[u8]) -> Result<(), Error> {
        self.prepend_zeroed(n.len())?.copy_from_slice(n);
        Ok(())
    }

    /// Grows the data region to the front by `len` zero bytes and returns them.
    #[inline]
    fn prepend_zeroed(&mut self, len: usize) -> Result<&mut [u8], Error> {
        self.grow_front(len)?;
        let hdr = &mut self.data_mut()[..len];
        hdr.fill(0);
        Ok(hdr)
    }
}
