//!
//! The transfer CRC: CRC-16-CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection, no final XOR)
//!
//! This checksum covers the application payload of a multi-frame transfer (not the tail bytes,
//! and not the CRC itself). Both implementations below produce identical output; which one
//! `TransferCrc` uses by default is controlled by the `crc-table`/`crc-bitwise` Cargo features
//! (mirroring the `CRC_TABLE` compile-time option of the reference implementation).
//!

const POLY: u16 = 0x1021;
pub const INITIAL: u16 = 0xFFFF;

/// Updates a CRC-16-CCITT-FALSE state one bit at a time, with no table
pub fn crc16_bitwise(initial: u16, data: &[u8]) -> u16 {
    let mut state = initial;
    for &byte in data {
        state ^= (byte as u16) << 8;
        for _ in 0..8 {
            state = if state & 0x8000 != 0 {
                (state << 1) ^ POLY
            } else {
                state << 1
            };
        }
    }
    state
}

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut state = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            state = if state & 0x8000 != 0 {
                (state << 1) ^ POLY
            } else {
                state << 1
            };
            bit += 1;
        }
        table[i] = state;
        i += 1;
    }
    table
}

static TABLE: [u16; 256] = build_table();

/// Updates a CRC-16-CCITT-FALSE state using the 256-entry lookup table
pub fn crc16_table(initial: u16, data: &[u8]) -> u16 {
    let mut state = initial;
    for &byte in data {
        let index = ((state >> 8) ^ u16::from(byte)) & 0xFF;
        state = (state << 8) ^ TABLE[index as usize];
    }
    state
}

/// An in-progress transfer CRC calculation
///
/// `crc(a ++ b) == crc_update(crc(a), b)`, and `crc(empty) == 0xFFFF`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TransferCrc {
    state: u16,
}

impl TransferCrc {
    /// Creates a new CRC calculation with the initial state (the value for an empty transfer)
    pub const fn new() -> Self {
        TransferCrc { state: INITIAL }
    }

    /// Folds one byte into the running CRC
    pub fn add(&mut self, byte: u8) {
        self.add_all(core::slice::from_ref(&byte));
    }

    /// Folds a sequence of bytes into the running CRC
    pub fn add_all(&mut self, bytes: &[u8]) {
        #[cfg(feature = "crc-bitwise")]
        {
            self.state = crc16_bitwise(self.state, bytes);
        }
        #[cfg(not(feature = "crc-bitwise"))]
        {
            self.state = crc16_table(self.state, bytes);
        }
    }

    /// Returns the CRC value of everything folded in so far
    pub fn get(&self) -> u16 {
        self.state
    }
}

impl Default for TransferCrc {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the transfer CRC of a complete byte slice in one call
pub fn transfer_crc(data: &[u8]) -> u16 {
    let mut crc = TransferCrc::new();
    crc.add_all(data);
    crc.get()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_is_initial() {
        assert_eq!(INITIAL, transfer_crc(&[]));
        assert_eq!(INITIAL, crc16_bitwise(INITIAL, &[]));
        assert_eq!(INITIAL, crc16_table(INITIAL, &[]));
    }

    #[test]
    fn bitwise_matches_table() {
        let inputs: &[&[u8]] = &[
            &[],
            &[0],
            &[0, 1, 2, 3, 4, 5, 6, 7],
            &(0..=60).collect::<alloc::vec::Vec<u8>>(),
            b"the quick brown fox jumps over the lazy dog",
        ];
        for input in inputs {
            assert_eq!(
                crc16_bitwise(INITIAL, input),
                crc16_table(INITIAL, input),
                "mismatch for {:?}",
                input
            );
        }
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let one_shot = transfer_crc(&data);

        let mut crc = TransferCrc::new();
        for &byte in &data {
            crc.add(byte);
        }
        assert_eq!(one_shot, crc.get());

        let mut crc = TransferCrc::new();
        crc.add_all(&data[..5]);
        crc.add_all(&data[5..]);
        assert_eq!(one_shot, crc.get());
    }

    /// Known-answer test from the worked examples: CRC of bytes 0..=7 is 0x178D
    #[test]
    fn known_answer_0_to_7() {
        let data = [0u8, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(0x178D, transfer_crc(&data));
    }

    /// Known-answer test from the worked examples: CRC of bytes 0..=60 is 0x554E
    #[test]
    fn known_answer_0_to_60() {
        let data: alloc::vec::Vec<u8> = (0..=60).collect();
        assert_eq!(0x554E, transfer_crc(&data));
    }

    /// Known-answer test from the worked examples: CRC of bytes 0..=111 is 0xE7A5
    #[test]
    fn known_answer_0_to_111() {
        let data: alloc::vec::Vec<u8> = (0..=111).collect();
        assert_eq!(0xE7A5, transfer_crc(&data));
    }
}
