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

use crate::shamir::{
    gf::{GfElem, GfPolynomial},
    Error, Share,
};

use itertools::Itertools;
use rand::{rngs::OsRng, CryptoRng, RngCore};

/// Largest number of shares a single split can produce (every non-zero
/// element of `GF(2^8)` is used as an x value).
pub const MAX_SHARES: usize = 255;

/// Check the `2 <= threshold <= shares <= 255` invariant.
pub fn check_threshold(shares: usize, threshold: usize) -> Result<(), Error> {
    if threshold < 2 || threshold > shares || shares > MAX_SHARES {
        return Err(Error::InvalidThreshold { threshold, shares });
    }
    Ok(())
}

/// Split `secret` into `n` shares, any `k` of which can recover it.
///
/// Randomness comes from the operating system CSPRNG.
pub fn split<B: AsRef<[u8]>>(secret: B, n: usize, k: usize) -> Result<Vec<Share>, Error> {
    split_with_rng(secret, n, k, &mut OsRng)
}

/// Like [`split`], but drawing polynomial coefficients from the given
/// cryptographically secure generator.
///
/// Each byte of the secret gets its own freshly generated polynomial of
/// degree `k-1`, which is then evaluated at the x values `1..=n`.
pub fn split_with_rng<B, R>(secret: B, n: usize, k: usize, rng: &mut R) -> Result<Vec<Share>, Error>
where
    B: AsRef<[u8]>,
    R: CryptoRng + RngCore + ?Sized,
{
    check_threshold(n, k)?;

    let polys = secret
        .as_ref()
        .iter()
        .map(|b| GfPolynomial::new_rand(GfElem::from(*b), k - 1, rng))
        .collect::<Vec<_>>();

    // n <= MAX_SHARES was checked above, so the cast is lossless.
    Ok((1..=n as u8)
        .map(GfElem::from)
        .map(|x| Share {
            x,
            ys: polys.iter().map(|poly| poly.evaluate(x)).collect(),
        })
        .collect())
}

/// Recover a secret from a set of shares.
///
/// The shares must have pairwise-distinct indices and equal payload lengths.
/// No attempt is made to check that enough shares were provided, or that
/// they all came from the same split: in either case the result is a
/// well-defined but *wrong* byte string. Use
/// [`combine_checked`](crate::shamir::combine_checked) if you need that
/// detected.
pub fn combine<S: AsRef<[Share]>>(shares: S) -> Result<Vec<u8>, Error> {
    let shares = shares.as_ref();

    if let Some(dup) = shares.iter().map(Share::index).duplicates().next() {
        return Err(Error::DuplicateShareIndex(dup));
    }

    let secret_len = match shares.iter().map(Share::len).dedup().collect::<Vec<_>>()[..] {
        [] => return Ok(Vec::new()),
        [len] => len,
        _ => {
            return Err(Error::MalformedShare(
                "shares have mismatched payload lengths".into(),
            ))
        }
    };

    // The interpolation weights only depend on the x values, so compute them
    // once and reuse them for every byte.
    let weights = GfPolynomial::lagrange_weights(shares.iter().map(|s| s.x).collect::<Vec<_>>())?;

    Ok((0..secret_len)
        .map(|i| {
            GfPolynomial::weighted_constant(shares.iter().map(|s| s.ys[i]), weights.iter().copied())
        })
        .map(u8::from)
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    use quickcheck::TestResult;
    use rand::{rngs::StdRng, seq::index::sample, SeedableRng};

    #[test]
    fn split_hello_scenario() {
        let shares = split_with_rng("HELLO", 5, 3, &mut StdRng::seed_from_u64(0x5eed)).unwrap();
        assert_eq!(shares.len(), 5);

        let picked = [shares[0].clone(), shares[2].clone(), shares[4].clone()];
        assert_eq!(combine(picked).unwrap(), b"HELLO");

        // Two shares are below the threshold -- we get *something* back, but
        // not the secret.
        let picked = [shares[0].clone(), shares[1].clone()];
        assert_ne!(combine(picked).unwrap(), b"HELLO");
    }

    #[quickcheck]
    fn split_indices(n: u8, k: u8, secret: Vec<u8>) -> TestResult {
        let (n, k) = (n as usize, k as usize);
        if k < 2 || k > n || n > 40 {
            return TestResult::discard();
        }
        let shares = split(&secret, n, k).unwrap();
        let indices = shares.iter().map(Share::index).collect::<Vec<_>>();

        TestResult::from_bool(
            indices == (1..=n as u8).collect::<Vec<_>>()
                && shares.iter().all(|s| s.len() == secret.len()),
        )
    }

    #[quickcheck]
    fn combine_any_k_subset(n: u8, k: u8, secret: Vec<u8>) -> TestResult {
        let (n, k) = (n as usize, k as usize);
        if k < 2 || k > n {
            return TestResult::discard();
        }
        let shares = split(&secret, n, k).unwrap();
        let subset = sample(&mut OsRng, n, k)
            .into_iter()
            .map(|i| shares[i].clone())
            .collect::<Vec<_>>();

        TestResult::from_bool(combine(subset).unwrap() == secret)
    }

    #[test]
    fn combine_every_subset_small() {
        let secret = b"correct horse battery staple";
        let shares = split(secret, 6, 4).unwrap();
        for size in 4..=6 {
            for subset in shares.iter().cloned().combinations(size) {
                assert_eq!(combine(subset).unwrap(), secret);
            }
        }
    }

    #[test]
    fn combine_max_shares() {
        let secret = b"every index in the field";
        let shares = split(secret, MAX_SHARES, MAX_SHARES).unwrap();
        assert_eq!(shares.last().map(Share::index), Some(255));
        assert_eq!(combine(&shares).unwrap(), secret);
    }

    #[test]
    fn split_empty_secret() {
        let shares = split(b"", 4, 2).unwrap();
        assert_eq!(shares.len(), 4);
        assert!(shares.iter().all(Share::is_empty));
        assert_eq!(combine(&shares[..2]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn split_invalid_threshold() {
        for (n, k) in [(5, 1), (5, 0), (3, 4), (256, 2), (300, 300)] {
            assert!(
                matches!(split(b"x", n, k), Err(Error::InvalidThreshold { .. })),
                "n={} k={} should be rejected",
                n,
                k
            );
        }
        assert!(split(b"x", 2, 2).is_ok());
        assert!(split(b"x", 255, 2).is_ok());
    }

    #[test]
    fn split_fresh_coefficients() {
        // The same secret byte at every position must not produce the same
        // evaluation at every position (coefficients are per-byte), and two
        // splits of the same secret must not produce identical shares.
        let secret = [0x42u8; 64];
        let a = split(secret, 3, 2).unwrap();
        let b = split(secret, 3, 2).unwrap();
        assert!(a[0].payload().iter().any(|y| *y != a[0].payload()[0]));
        assert_ne!(a[0].payload(), b[0].payload());
    }

    #[test]
    fn combine_duplicate_index() {
        let shares = split(b"duplicate", 5, 3).unwrap();
        let picked = [shares[0].clone(), shares[1].clone(), shares[1].clone()];
        assert!(matches!(
            combine(picked),
            Err(Error::DuplicateShareIndex(2))
        ));

        // Even if the duplicate carries a different payload, it must not be
        // silently dropped.
        let fake = Share::new(1, shares[3].payload()).unwrap();
        let picked = [shares[0].clone(), shares[2].clone(), shares[3].clone(), fake];
        assert!(matches!(
            combine(picked),
            Err(Error::DuplicateShareIndex(1))
        ));
    }

    #[test]
    fn combine_length_mismatch() {
        let a = split(b"four", 3, 2).unwrap();
        let b = split(b"three", 3, 2).unwrap();
        assert!(matches!(
            combine([a[0].clone(), b[1].clone()]),
            Err(Error::MalformedShare(_))
        ));
    }

    #[test]
    fn combine_foreign_share_is_wrong_but_deterministic() {
        let secret = b"HELLO";
        let shares = split(secret, 5, 3).unwrap();

        // Swap in a share with the same index but a corrupted payload. Since
        // interpolation is linear and every Lagrange weight is non-zero, every
        // byte of the result must change.
        let corrupted = Share::new(
            shares[2].index(),
            shares[2].payload().iter().map(|y| y ^ 0x01).collect::<Vec<_>>(),
        )
        .unwrap();
        let picked = [shares[0].clone(), shares[1].clone(), corrupted];

        let first = combine(&picked).unwrap();
        let second = combine(&picked).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), secret.len());
        assert!(first.iter().zip(secret).all(|(a, b)| a != b));
    }

    #[test]
    fn combine_no_shares() {
        assert_eq!(combine(Vec::<Share>::new()).unwrap(), Vec::<u8>::new());
    }
}
