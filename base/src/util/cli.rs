use std::fmt::Debug;
use std::str::FromStr;

use arrayvec::ArrayVec;

use crate::defs::{Error, ErrorKind::*, Result};

#[derive(Clone, Copy, Debug)]
pub struct Array<T: FromStr, const N: usize>(pub [T; N]);

impl<T: Debug + Default + FromStr, const N: usize> FromStr for Array<T, N> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed_err = || {
            let desc = format!("malformed value array '{}'", s);
            Error::new(MalformedData, desc)
        };

        let parse = |iter: &mut std::str::Split<char>| {
            let part = iter.next().ok_or_else(malformed_err)?;
            if part.is_empty() {
                Ok(T::default())
            } else {
                part.trim().parse::<T>().map_err(|_| malformed_err())
            }
        };

        let mut iter = s.split(',');
        let mut vec = ArrayVec::<T, N>::new();

        for _ in 0..N {
            vec.push(parse(&mut iter)?);
        }

        if iter.next().is_some() {
            return Err(malformed_err());
        }

        vec.into_inner().map(Array).map_err(|_| malformed_err())
    }
}

impl<T: FromStr, const N: usize> From<[T; N]> for Array<T, N> {
    fn from(array: [T; N]) -> Self {
        Self(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array() {
        let a: Array<f32, 2> = "1920,1440".parse().unwrap();
        assert_eq!(a.0, [1920.0, 1440.0]);

        let b: Array<u32, 2> = "16,".parse().unwrap();
        assert_eq!(b.0, [16, 0]);
    }

    #[test]
    fn test_parse_malformed_array() {
        let err = "1,2,3".parse::<Array<u32, 2>>().unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "malformed value array '1,2,3'");

        assert!("1".parse::<Array<u32, 2>>().is_err());
        assert!("a,b".parse::<Array<u32, 2>>().is_err());
    }
}
