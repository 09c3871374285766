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

use nom::{
    error::{Error as NomError, ErrorKind},
    Err as NomErr, IResult, Needed,
};
use unsigned_varint::decode as varuint_decode;

/// Strip out the whitespace (and, for non-url bases, "-" separators) that
/// humans tend to add when copying multibase strings around.
pub fn multibase_strip<S: AsRef<str>>(data: S) -> Result<String, String> {
    let data = data.as_ref().trim();
    match data.chars().next() {
        Some(ch) => Ok(data.replace(
            match multibase::Base::from_code(ch) {
                Ok(multibase::Base::Base64Url) | Ok(multibase::Base::Base64UrlPad) => {
                    &['\t', ' ', '\n', '\r'][..]
                } // url-base64 -- do not remove "-"
                Ok(_) => &['\t', ' ', '\n', '\r', '-'][..],
                Err(err) => return Err(format!("error parsing multibase string: {}", err)),
            },
            "",
        )),
        None => Err("error parsing multibase string: empty string".to_string()),
    }
}

pub trait ToWire {
    fn to_wire(&self) -> Vec<u8>;

    /// Convert a `ToWire`-implementing type to a multibase string.
    fn to_wire_multibase(&self, base: multibase::Base) -> String {
        multibase::encode(base, self.to_wire())
    }
}

pub trait FromWire: Sized {
    fn from_wire_partial(input: &[u8]) -> Result<(&[u8], Self), String>;

    fn from_wire<B: AsRef<[u8]>>(input: B) -> Result<Self, String> {
        match Self::from_wire_partial(input.as_ref())? {
            ([], ret) => Ok(ret),
            _ => Err("trailing bytes left after deseralisation".into()),
        }
    }

    /// Parse a multibase-encoded representation of a `FromWire`-implementing
    /// type as that type.
    fn from_wire_multibase<S: AsRef<str>>(input: S) -> Result<Self, String> {
        let (_, data) = multibase::decode(input).map_err(|err| format!("{:?}", err))?;
        Self::from_wire(data)
    }
}

/// nom parser for an unsigned-varint encoded `usize`.
pub(crate) fn varuint_usize(input: &[u8]) -> IResult<&[u8], usize> {
    let (n, remain) = varuint_decode::usize(input).map_err(|err| match err {
        varuint_decode::Error::Insufficient => NomErr::Incomplete(Needed::Unknown),
        _ => NomErr::Error(NomError::new(input, ErrorKind::TooLarge)),
    })?;
    Ok((remain, n))
}
