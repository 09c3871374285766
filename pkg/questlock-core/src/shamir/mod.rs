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

//! This package implements a Shamir Secret Sharing scheme in GF(2^8), meaning
//! that every byte of the secret is shared independently (and all x and y
//! values are single bytes). As a result a single split can produce at most
//! 255 shares.
//!
//! ## Security ##
//! Field multiplication and inversion are written without data-dependent
//! branches, but this implementation has not been reviewed by any
//! cryptographers. Shares carry no authentication: combining too few shares,
//! or shares from unrelated splits, yields a wrong secret rather than an
//! error (see the [`checked`] helpers for an opt-in way of detecting that).

pub mod checked;
mod dealer;
pub mod gf;
mod share;

pub use checked::{combine_checked, split_checked};
pub use dealer::{check_threshold, combine, split, split_with_rng, MAX_SHARES};
pub use share::{Share, SHARE_MULTIBASE};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "invalid threshold: need 2 <= threshold ({}) <= shares ({}) <= 255",
        threshold,
        shares
    )]
    InvalidThreshold { threshold: usize, shares: usize },

    #[error("duplicate share index {0}")]
    DuplicateShareIndex(u8),

    #[error("malformed share: {0}")]
    MalformedShare(String),

    #[error("lagrange interpolation failed: {0}")]
    LagrangeError(#[from] gf::Error),

    #[error("recovered secret does not match its embedded checksum")]
    ChecksumMismatch,
}
