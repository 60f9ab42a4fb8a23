//! Bit-length aware views over byte buffers.
//!
//! All JTAG vectors in this crate are LSB-first: bit `n` of a vector lives in
//! byte `n / 8` at bit position `n % 8`, and bit 0 is the first bit clocked
//! onto TDI (or captured from TDO). Bits past the declared length in the last
//! byte are always zero in buffers produced here.
use bitvec::prelude::*;

/// Number of bytes needed to hold `bits` bits.
pub fn byte_len(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// A buffer of `bits` bits, all set to `value`.
pub fn filled(value: bool, bits: usize) -> Vec<u8> {
    let mut vector: BitVec<u8, Lsb0> = BitVec::repeat(value, bits);
    vector.set_uninitialized(false);
    vector.into_vec()
}

/// Iterates over the first `bits` bits of `bytes` in clock order.
/// Panics if `bytes` is shorter than `byte_len(bits)`.
pub fn iter_bits(bytes: &[u8], bits: usize) -> impl Iterator<Item = bool> + '_ {
    bytes.view_bits::<Lsb0>()[..bits].iter().by_vals()
}

/// Packs bits in clock order into bytes.
pub fn pack_bits(bits: impl IntoIterator<Item = bool>) -> Vec<u8> {
    let mut vector: BitVec<u8, Lsb0> = bits.into_iter().collect();
    vector.set_uninitialized(false);
    vector.into_vec()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn filled_clears_trailing_bits() {
        assert_eq!(filled(true, 12), vec![0xff, 0x0f]);
        assert_eq!(filled(false, 9), vec![0x00, 0x00]);
        assert!(filled(true, 0).is_empty());
    }

    #[test]
    fn iterates_lsb_first() {
        let bits: Vec<bool> = iter_bits(&[0b0000_0101, 0b1], 9).collect();
        assert_eq!(
            bits,
            vec![true, false, true, false, false, false, false, false, true]
        );
    }

    #[test]
    fn pack_matches_iteration() {
        let data = [0xef, 0xbe, 0xad, 0x1e];
        let packed = pack_bits(iter_bits(&data, 29));
        assert_eq!(packed, vec![0xef, 0xbe, 0xad, 0x1e]);
        assert_eq!(byte_len(29), 4);
    }
}
