//! CRC-8 protecting FRN20 response frames
//!
//! Polynomial 0x131 (x^8 + x^5 + x^4 + 1), initial value 0x00, MSB first,
//! no reflection and no final XOR.

/// Generator polynomial including the implicit x^8 term
pub const CRC8_POLYNOMIAL: u16 = 0x131;

/// Register value before the first byte
pub const CRC8_INIT: u8 = 0x00;

/// Compute the CRC-8 of `data`
pub fn crc8(data: &[u8]) -> u8 {
    let polynomial = (CRC8_POLYNOMIAL & 0xFF) as u8;
    data.iter().fold(CRC8_INIT, |crc, &byte| {
        let mut crc = crc ^ byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ polynomial
            } else {
                crc << 1
            };
        }
        crc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::vec::Vec;

    #[test]
    fn zero_input_has_zero_crc() {
        assert_eq!(crc8(&[]), 0);
        assert_eq!(crc8(&[0, 0, 0, 0]), 0);
    }

    #[test]
    fn known_vectors() {
        assert_eq!(crc8(&[0x01]), 0x31);
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x13);
        assert_eq!(crc8(b"123456789"), 0xA2);
        assert_eq!(crc8(&[0x12, 0x34, 0x00, 0x00]), 0xCB);
    }

    proptest! {
        #[test]
        fn appended_crc_leaves_zero_remainder(data in proptest::collection::vec(any::<u8>(), 0..48)) {
            let mut framed = data.clone();
            framed.push(crc8(&data));
            prop_assert_eq!(crc8(&framed), 0);
        }

        #[test]
        fn single_byte_corruption_is_detected(
            data in proptest::collection::vec(any::<u8>(), 1..48),
            position in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut corrupted: Vec<u8> = data.clone();
            let index = position.index(corrupted.len());
            corrupted[index] ^= flip;
            prop_assert_ne!(crc8(&corrupted), crc8(&data));
        }
    }
}
