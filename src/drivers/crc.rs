//! Table driven CRC-32 for targets without (or not trusting) a
//! hardware CRC unit, and for host tests.
use crate::hal::crc::Crc32;
use crc::crc32::{self, Hasher32};

pub struct SoftwareCrc {
    digest: crc32::Digest,
}

impl SoftwareCrc {
    pub fn new() -> Self { Self { digest: crc32::Digest::new(crc32::IEEE) } }
}

impl Default for SoftwareCrc {
    fn default() -> Self { Self::new() }
}

impl Crc32 for SoftwareCrc {
    fn reset(&mut self) { self.digest.reset(); }
    fn update(&mut self, bytes: &[u8]) { self.digest.write(bytes); }
    fn finish(&mut self) -> u32 { self.digest.sum32() }
}
