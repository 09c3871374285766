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

//! Checksum-sealed splitting.
//!
//! Plain [`combine`] cannot tell a correct reconstruction from garbage. These
//! helpers embed a multihash of the secret in front of it before splitting,
//! so a reconstruction from too few (or unrelated) shares is reported as
//! [`Error::ChecksumMismatch`] instead of silently returning the wrong bytes.
//! Shares produced this way are one multihash longer than the secret and can
//! only be recovered with [`combine_checked`].

use crate::shamir::{combine, split, Error, Share};

use std::io;

use multihash::Multihash;
use multihash_codetable::{Code, MultihashDigest};

const CHECKSUM_ALGORITHM: Code = Code::Blake2b256;

fn seal(secret: &[u8]) -> Vec<u8> {
    let mut bytes = CHECKSUM_ALGORITHM.digest(secret).to_bytes();
    bytes.extend_from_slice(secret);
    bytes
}

fn unseal(sealed: &[u8]) -> Result<Vec<u8>, Error> {
    let mut cursor = io::Cursor::new(sealed);
    let chksum = Multihash::<64>::read(&mut cursor).map_err(|_| Error::ChecksumMismatch)?;
    let secret = &sealed[cursor.position() as usize..];

    if CHECKSUM_ALGORITHM.digest(secret) != chksum {
        return Err(Error::ChecksumMismatch);
    }
    Ok(secret.to_vec())
}

/// [`split`] with an embedded checksum of the secret.
pub fn split_checked<B: AsRef<[u8]>>(secret: B, n: usize, k: usize) -> Result<Vec<Share>, Error> {
    split(seal(secret.as_ref()), n, k)
}

/// [`combine`] followed by verification of the checksum embedded by
/// [`split_checked`].
pub fn combine_checked<S: AsRef<[Share]>>(shares: S) -> Result<Vec<u8>, Error> {
    unseal(&combine(shares)?)
}

#[cfg(test)]
mod test {
    use super::*;

    use quickcheck::TestResult;

    #[quickcheck]
    fn checked_roundtrip(secret: Vec<u8>, k: u8) -> TestResult {
        let k = k as usize;
        if !(2..=16).contains(&k) {
            return TestResult::discard();
        }
        let shares = split_checked(&secret, k + 2, k).unwrap();
        TestResult::from_bool(combine_checked(&shares[2..]).unwrap() == secret)
    }

    #[test]
    fn checked_too_few_shares() {
        let shares = split_checked(b"HELLO", 5, 3).unwrap();
        assert!(matches!(
            combine_checked(&shares[..2]),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn checked_foreign_share() {
        let shares = split_checked(b"HELLO", 5, 3).unwrap();
        let other = split_checked(b"WORLD", 5, 3).unwrap();
        let picked = [shares[0].clone(), shares[1].clone(), other[2].clone()];
        assert!(matches!(
            combine_checked(picked),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn checked_plain_shares_rejected() {
        let shares = split(b"no checksum here", 3, 2).unwrap();
        assert!(combine_checked(&shares[..2]).is_err());
    }
}
