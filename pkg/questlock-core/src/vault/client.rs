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

//! The owner's side of a lock: splitting a credential into client-held and
//! custodial shares, and putting it back together afterwards.

use crate::{
    config::Policy,
    lock::quest::QuestCondition,
    shamir::{self, Share},
    vault::{
        view::{CreateLockRequest, CreateQuestRequest, LockView},
        Error,
    },
};

use rand::{rngs::OsRng, CryptoRng, Rng, RngCore};

/// Characters used by [`generate_secret`].
const SECRET_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#$%&*+-=?@^_";

/// A lock ready to be sent to the vault, and the shares the owner must keep.
#[derive(Debug)]
pub struct PreparedLock {
    pub request: CreateLockRequest,
    pub client_shares: Vec<Share>,
}

/// Split `secret` according to `policy`, attaching the last
/// `conditions.len()` shares to the quests and leaving the rest with the
/// owner.
pub fn prepare_lock<B: AsRef<[u8]>>(
    secret: B,
    label: Option<String>,
    policy: &Policy,
    conditions: Vec<QuestCondition>,
) -> Result<PreparedLock, Error> {
    prepare_lock_with_rng(secret, label, policy, conditions, &mut OsRng)
}

pub fn prepare_lock_with_rng<B, R>(
    secret: B,
    label: Option<String>,
    policy: &Policy,
    conditions: Vec<QuestCondition>,
    rng: &mut R,
) -> Result<PreparedLock, Error>
where
    B: AsRef<[u8]>,
    R: CryptoRng + RngCore + ?Sized,
{
    if conditions.is_empty() {
        return Err(Error::PolicyViolation(
            "a lock needs at least one quest".into(),
        ));
    }
    if conditions.len() > policy.max_quests {
        return Err(Error::PolicyViolation(format!(
            "at most {} quests are allowed, got {}",
            policy.max_quests,
            conditions.len()
        )));
    }
    for condition in &conditions {
        condition.validate()?;
    }

    let mut client_shares =
        shamir::split_with_rng(secret, policy.total_shares, policy.threshold, rng)?;
    if conditions.len() > client_shares.len() {
        return Err(Error::PolicyViolation(format!(
            "{} quests cannot be backed by {} shares",
            conditions.len(),
            client_shares.len()
        )));
    }
    let custodial = client_shares.split_off(client_shares.len() - conditions.len());

    Ok(PreparedLock {
        request: CreateLockRequest {
            label,
            total_shares: policy.total_shares,
            threshold: policy.threshold,
            quests: conditions
                .iter()
                .zip(&custodial)
                .map(|(condition, share)| CreateQuestRequest::new(condition, share))
                .collect(),
        },
        client_shares,
    })
}

/// Recover the secret from the owner's shares and whatever custodial shares
/// `lock` has released.
pub fn recover(client_shares: &[Share], lock: &LockView) -> Result<Vec<u8>, Error> {
    let mut shares = client_shares.to_vec();
    shares.extend(lock.released_shares()?);
    if shares.len() < lock.threshold {
        return Err(Error::InsufficientShares {
            have: shares.len(),
            need: lock.threshold,
        });
    }
    Ok(shamir::combine(shares)?)
}

/// Generate a random printable credential of `len` characters.
pub fn generate_secret(len: usize) -> String {
    generate_secret_with_rng(len, &mut OsRng)
}

pub fn generate_secret_with_rng<R: CryptoRng + RngCore>(len: usize, rng: &mut R) -> String {
    (0..len)
        .map(|_| char::from(SECRET_ALPHABET[rng.gen_range(0..SECRET_ALPHABET.len())]))
        .collect()
}
