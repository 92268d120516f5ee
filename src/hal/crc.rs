//! Streaming 32 bit checksum computation.
//!
//! Implementations must produce the CRC-32/ISO-HDLC checksum
//! (reflected polynomial `0xEDB88320`, initial value and final XOR
//! `0xFFFFFFFF`), which is part of the on-flash format.

pub trait Crc32 {
    /// Restarts the computation.
    fn reset(&mut self);
    /// Feeds more bytes into the running computation.
    fn update(&mut self, bytes: &[u8]);
    /// Checksum of all bytes fed since the last reset.
    fn finish(&mut self) -> u32;

    /// Checksum of a single contiguous buffer.
    fn checksum(&mut self, bytes: &[u8]) -> u32 {
        self.reset();
        self.update(bytes);
        self.finish()
    }
}
