/*
 * questlock: threshold-split credentials released through real-world quests
 * Copyright (C) 2018-2022 Aleksa Sarai <cyphar@cyphar.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::{
    shamir::{
        gf::{GfElem, GfElemPrimitive},
        Error,
    },
    wire::{multibase_strip, FromWire, ToWire},
};

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use unsigned_varint::encode as varuint_encode;

/// Multibase used for the text form of a [`Share`].
pub const SHARE_MULTIBASE: multibase::Base = multibase::Base::Base32Z;

/// Piece of a secret which has been split with [Shamir Secret Sharing][sss].
///
/// A share is the evaluation of one random polynomial per secret byte at the
/// share's (non-zero) index, so the payload is exactly as long as the secret.
///
/// [sss]: https://en.wikipedia.org/wiki/Shamir%27s_Secret_Sharing
#[derive(Clone, Eq, PartialEq)]
pub struct Share {
    pub(super) x: GfElem,
    pub(super) ys: Vec<GfElem>,
}

impl Share {
    /// Construct a share from its raw parts.
    pub fn new<B: AsRef<[u8]>>(index: u8, payload: B) -> Result<Self, Error> {
        if index == 0 {
            return Err(Error::MalformedShare("share index must be non-zero".into()));
        }
        Ok(Self {
            x: GfElem::from_inner(index),
            ys: payload
                .as_ref()
                .iter()
                .copied()
                .map(GfElem::from_inner)
                .collect(),
        })
    }

    /// The x value this share was evaluated at, unique within a split.
    pub fn index(&self) -> u8 {
        self.x.inner()
    }

    /// Length of the secret this share was split from.
    pub fn len(&self) -> usize {
        self.ys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ys.is_empty()
    }

    pub fn payload(&self) -> Vec<u8> {
        self.ys.iter().map(GfElem::inner).collect()
    }

    /// Index-prefixed text encoding of the share.
    pub fn encode(&self) -> String {
        self.to_wire_multibase(SHARE_MULTIBASE)
    }

    /// Parse the text encoding produced by [`Share::encode`]. Any multibase
    /// is accepted, not just the one we produce.
    pub fn decode<S: AsRef<str>>(encoded: S) -> Result<Self, Error> {
        multibase_strip(encoded)
            .and_then(Self::from_wire_multibase)
            .map_err(Error::MalformedShare)
    }
}

// Share payloads are secret material, so keep them out of debug output.
impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl ToWire for Share {
    fn to_wire(&self) -> Vec<u8> {
        let mut bytes = vec![self.x.inner()];

        // Encode y-values (length-prefixed).
        varuint_encode::usize(self.ys.len(), &mut varuint_encode::usize_buffer())
            .iter()
            .copied()
            .chain(self.ys.iter().map(GfElem::inner))
            .for_each(|b| bytes.push(b));

        bytes
    }
}

impl FromWire for Share {
    fn from_wire_partial(input: &[u8]) -> Result<(&[u8], Self), String> {
        use nom::{
            bytes::complete::take, combinator::verify, number::complete::be_u8, IResult,
        };

        fn parse(input: &[u8]) -> IResult<&[u8], Share> {
            let (input, x) = verify(be_u8, |x: &GfElemPrimitive| *x != 0)(input)?;
            let (input, ys_length) = crate::wire::varuint_usize(input)?;
            let (input, ys) = take(ys_length)(input)?;

            Ok((
                input,
                Share {
                    x: GfElem::from_inner(x),
                    ys: ys.iter().copied().map(GfElem::from_inner).collect(),
                },
            ))
        }

        let (input, share) = parse(input).map_err(|err| format!("{:?}", err))?;

        Ok((input, share))
    }
}

impl Serialize for Share {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Share {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Share::decode(encoded).map_err(de::Error::custom)
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for Share {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self {
            x: GfElem::from_inner(u8::arbitrary(g).max(1)),
            ys: (0..g.size()).map(|_| GfElem::arbitrary(g)).collect(),
        }
    }
}
