/*!
    16 bit integrity code protecting frames and firmware images

    The same code is used for the frame trailer, for each firmware frame and for the whole firmware image.
*/
use core::fmt;
use crc::{Algorithm, Crc, Digest};


/**
    polynomial, initial value and reflection of the bus checksum

    CRC-16/MODBUS sent little endian is an assumption: it has not been checked against frames captured from deployed boards, change this constant if they disagree
*/
pub const ALGORITHM: Algorithm<u16> = crc::CRC_16_MODBUS;

static ENGINE: Crc<u16> = Crc::<u16>::new(&ALGORITHM);


/// checksum of a whole byte span
pub fn checksum(data: &[u8]) -> u16 {
    ENGINE.checksum(data)
}

/// checksum computed over data arriving in several chunks
#[derive(Clone)]
pub struct Running {
    digest: Digest<'static, u16>,
}
impl Running {
    pub fn new() -> Self {
        Self {digest: ENGINE.digest()}
    }
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }
    /// checksum of everything fed so far, feeding can continue afterward
    pub fn value(&self) -> u16 {
        self.digest.clone().finalize()
    }
}
impl Default for Running {
    fn default() -> Self {Self::new()}
}
impl fmt::Debug for Running {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Running({:#06x})", self.value())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(checksum(b"123456789"), 0x4b37);
    }

    #[test]
    fn running_matches_oneshot() {
        let data: [u8; 300] = core::array::from_fn(|i| (i * 7) as u8);
        let mut running = Running::new();
        for chunk in data.chunks(128) {
            running.update(chunk);
        }
        assert_eq!(running.value(), checksum(&data));
        // reading the value does not consume the digest
        running.update(&[1, 2, 3]);
        assert_ne!(running.value(), checksum(&data));
    }

    #[test]
    fn empty() {
        assert_eq!(Running::new().value(), checksum(&[]));
    }
}
