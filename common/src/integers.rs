//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! A 24-bit unsigned integer, as carried in RTP header extensions.

use std::{convert::TryFrom, fmt};

use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("value does not fit in 24 bits")]
pub struct TryFromIntError(());

#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct U24(u32);

impl U24 {
    pub const SIZE: usize = 3;
    pub const ZERO: U24 = U24(0);
    pub const MAX: U24 = U24(0x00ff_ffff);

    /// Keeps the low 24 bits.
    pub fn truncate(value: u32) -> Self {
        Self(value & Self::MAX.0)
    }

    /// None if the sum reaches 2^24.
    pub fn checked_add(self, rhs: u32) -> Option<Self> {
        self.0
            .checked_add(rhs)
            .and_then(|sum| Self::try_from(sum).ok())
    }

    pub fn to_be_bytes(self) -> [u8; Self::SIZE] {
        let [_, b0, b1, b2] = self.0.to_be_bytes();
        [b0, b1, b2]
    }
}

impl fmt::Debug for U24 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U24({:#08x})", self.0)
    }
}

impl fmt::Display for U24 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<u32> for U24 {
    type Error = TryFromIntError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > Self::MAX.0 {
            Err(TryFromIntError(()))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<u16> for U24 {
    fn from(value: u16) -> Self {
        Self(value.into())
    }
}

impl From<U24> for u32 {
    fn from(value: U24) -> Self {
        value.0
    }
}
