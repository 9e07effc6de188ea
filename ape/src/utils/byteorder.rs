//! Little-endian serialization helpers for container structures.

use std::io::{self, Read};

pub trait WriteBytesLe {
    fn write_le(&self, dst: &mut Vec<u8>);
}

pub trait ReadBytesLe: Sized {
    fn read_le<R: Read + ?Sized>(src: &mut R) -> io::Result<Self>;
}

macro_rules! impl_num_le {
    ($($t:ty),+) => { $(
        impl WriteBytesLe for $t {
            #[inline]
            fn write_le(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_le_bytes()); }
        }
        impl ReadBytesLe for $t {
            #[inline]
            fn read_le<R: Read + ?Sized>(src: &mut R) -> io::Result<Self> {
                let mut buf = [0u8; size_of::<$t>()];
                src.read_exact(&mut buf)?;
                Ok(<$t>::from_le_bytes(buf))
            }
        }
    )+ }
}

impl_num_le!(u8, i8, u16, i16, u32, i32, u64, i64);

impl<T: WriteBytesLe> WriteBytesLe for Vec<T> {
    #[inline]
    fn write_le(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_le(dst));
    }
}

impl<T: WriteBytesLe, const N: usize> WriteBytesLe for [T; N] {
    #[inline]
    fn write_le(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_le(dst));
    }
}

impl<T: ReadBytesLe + Default + Copy, const N: usize> ReadBytesLe for [T; N] {
    fn read_le<R: Read + ?Sized>(src: &mut R) -> io::Result<Self> {
        let mut out = [T::default(); N];
        for item in out.iter_mut() {
            *item = T::read_le(src)?;
        }
        Ok(out)
    }
}

#[macro_export]
macro_rules! join_bytes_le {
    ( $($value:expr),+ $(,)? ) => {{
        let mut vec = Vec::<u8>::new();
        $( $crate::utils::byteorder::WriteBytesLe::write_le(&$value, &mut vec); )+
        vec
    }};
}

#[allow(unused_imports)]
pub use join_bytes_le;

#[cfg(test)]
mod tests {
    use super::{ReadBytesLe, WriteBytesLe};
    use ape_macros::ToBytes;

    #[derive(ToBytes)]
    struct Mini {
        a: u16,
        b: u32,
        tag: [u8; 4],
    }

    #[test]
    fn to_bytes_little_endian() {
        let s = Mini {
            a: 0x1234,
            b: 0xABCDEF01,
            tag: *b"TEST",
        };

        let mut vec_le = Vec::new();
        s.write_le(&mut vec_le);

        let expected_le = [0x34, 0x12, 0x01, 0xEF, 0xCD, 0xAB, b'T', b'E', b'S', b'T'];
        assert_eq!(&vec_le[..], &expected_le);
    }

    #[test]
    fn read_back_fields() {
        let bytes = join_bytes_le!(0xBEEFu16, -2i32, 7u64);
        let mut src = &bytes[..];

        assert_eq!(u16::read_le(&mut src).unwrap(), 0xBEEF);
        assert_eq!(i32::read_le(&mut src).unwrap(), -2);
        assert_eq!(u64::read_le(&mut src).unwrap(), 7);
        assert!(u8::read_le(&mut src).is_err());
    }
}
