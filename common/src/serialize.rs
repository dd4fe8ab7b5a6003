//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Building packets out of parts. Headers, extension blocks and payloads are
//! composed as tuples and written into one buffer of the right size.

use crate::integers::U24;

pub trait Writer {
    fn written_len(&self) -> usize;
    fn write(&self, out: &mut dyn Writable);

    fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(self.written_len());
        self.write(&mut vec);
        vec
    }
}

/// A sink that accepts every byte it is given.
pub trait Writable {
    fn write(&mut self, input: &[u8]);
}

impl Writable for Vec<u8> {
    fn write(&mut self, input: &[u8]) {
        self.extend_from_slice(input);
    }
}

macro_rules! impl_writer_for_bytes {
    ($($bytes:ty),+ $(,)?) => {
        $(impl Writer for $bytes {
            fn written_len(&self) -> usize {
                self.len()
            }
            fn write(&self, out: &mut dyn Writable) {
                out.write(self.as_ref());
            }
        })+
    };
}

// u8 itself has no impl so that [u8] doesn't collide with a generic [T].
impl_writer_for_bytes!([u8], Vec<u8>);

impl<const N: usize> Writer for [u8; N] {
    fn written_len(&self) -> usize {
        N
    }
    fn write(&self, out: &mut dyn Writable) {
        out.write(self);
    }
}

macro_rules! impl_writer_for_big_endian {
    ($($int:ty),+ $(,)?) => {
        $(impl Writer for $int {
            fn written_len(&self) -> usize {
                self.to_be_bytes().len()
            }
            fn write(&self, out: &mut dyn Writable) {
                out.write(&self.to_be_bytes());
            }
        })+
    };
}

impl_writer_for_big_endian!(u16, U24);

macro_rules! impl_writer_for_tuple {
    ($($part:ident)+) => {
        impl<$($part: Writer),+> Writer for ($($part,)+) {
            #[allow(non_snake_case)]
            fn written_len(&self) -> usize {
                let ($($part,)+) = self;
                0 $(+ $part.written_len())+
            }
            #[allow(non_snake_case)]
            fn write(&self, out: &mut dyn Writable) {
                let ($($part,)+) = self;
                $($part.write(out);)+
            }
        }
    };
}

impl_writer_for_tuple! { A B }
impl_writer_for_tuple! { A B C }
impl_writer_for_tuple! { A B C D }
impl_writer_for_tuple! { A B C D E }

// Lets borrowed parts sit inside tuples.
impl<T: Writer + ?Sized> Writer for &T {
    fn written_len(&self) -> usize {
        T::written_len(self)
    }
    fn write(&self, out: &mut dyn Writable) {
        T::write(self, out)
    }
}
