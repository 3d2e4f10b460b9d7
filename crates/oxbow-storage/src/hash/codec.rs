//! Fixed-width key/value encoding for bucket entries.
//!
//! Bucket pages store entries as the concatenation of a fixed-size key and
//! a fixed-size value, so the types stored in the index must encode to a
//! known width. Integer primitives are supported out of the box; embedders
//! with richer key types implement [`FixedCodec`] themselves.

/// A type with a fixed-width little-endian on-page encoding.
pub trait FixedCodec: Copy {
    /// Encoded width in bytes.
    const ENCODED_LEN: usize;

    /// Writes the encoding into `buf`, which is exactly `ENCODED_LEN` long.
    fn encode_into(&self, buf: &mut [u8]);

    /// Reads a value back from `buf`, which is exactly `ENCODED_LEN` long.
    fn decode_from(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_codec_for_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FixedCodec for $ty {
                const ENCODED_LEN: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode_into(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode_from(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(buf);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_fixed_codec_for_int!(u16, u32, u64, i16, i32, i64);

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: FixedCodec + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = vec![0u8; T::ENCODED_LEN];
        value.encode_into(&mut buf);
        assert_eq!(T::decode_from(&buf), value);
    }

    #[test]
    fn test_int_round_trips() {
        round_trip(0u32);
        round_trip(u32::MAX);
        round_trip(-1i64);
        round_trip(i64::MIN);
        round_trip(0x1234u16);
    }

    #[test]
    fn test_encoding_is_little_endian() {
        let mut buf = [0u8; 4];
        0x0A0B0C0Du32.encode_into(&mut buf);
        assert_eq!(buf, [0x0D, 0x0C, 0x0B, 0x0A]);
    }
}
