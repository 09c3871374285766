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

//! Locks: a split credential together with the quests guarding the
//! custodial share of it.
//!
//! A [`Lock`] is created in one step by [`Lock::seal`], which checks every
//! structural invariant up front. After that the only thing that can change
//! is the status of each quest, which only ever moves forward.

pub mod evaluate;
pub mod quest;

use crate::shamir::{self, Share};
use quest::{Quest, QuestCondition, QuestStatus, QuestType, Transition};

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shamir error: {0}")]
    Shamir(#[from] shamir::Error),

    #[error("invalid {quest_type} quest data: {reason}")]
    InvalidQuestData {
        quest_type: QuestType,
        reason: String,
    },

    #[error("{quests} quests cannot be backed by only {total_shares} shares")]
    TooManyQuests { quests: usize, total_shares: usize },

    #[error("custodial share index {index} is outside 1..={total_shares}")]
    CustodialShareOutOfRange { index: u8, total_shares: usize },

    #[error("quest {quest} belongs to lock {owner} rather than {lock}")]
    ForeignQuest {
        quest: QuestId,
        owner: LockId,
        lock: LockId,
    },

    #[error("quest {0} appears more than once")]
    DuplicateQuest(QuestId),

    #[error("quest {0} not found")]
    QuestNotFound(QuestId),

    #[error("{evidence} evidence cannot be used for a {quest_type} quest")]
    EvidenceMismatch {
        quest_type: QuestType,
        evidence: &'static str,
    },
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a [`Lock`].
    LockId
);
uuid_id!(
    /// Identifier of a [`Quest`].
    QuestId
);

/// An authenticated user. Locks are only ever visible to their owner.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A quest that has not been attached to a lock yet.
#[derive(Clone, Debug)]
pub struct NewQuest {
    pub condition: QuestCondition,
    pub share: Share,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "LockRecord")]
pub struct Lock {
    id: LockId,
    owner: Principal,
    label: Option<String>,
    total_shares: u8,
    threshold: u8,
    quests: Vec<Quest>,
    created_at: DateTime<Utc>,
}

/// Serialised form of a [`Lock`], checked before it becomes one.
#[derive(Deserialize)]
struct LockRecord {
    id: LockId,
    owner: Principal,
    label: Option<String>,
    total_shares: u8,
    threshold: u8,
    quests: Vec<Quest>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LockRecord> for Lock {
    type Error = Error;

    fn try_from(record: LockRecord) -> Result<Self, Self::Error> {
        check_quests(
            record.total_shares.into(),
            record.threshold.into(),
            record.quests.iter().map(|q| (q.condition(), q.share())),
        )?;
        if let Some(quest) = record.quests.iter().find(|q| q.lock_id() != record.id) {
            return Err(Error::ForeignQuest {
                quest: quest.id(),
                owner: quest.lock_id(),
                lock: record.id,
            });
        }
        if let Some(id) = record.quests.iter().map(Quest::id).duplicates().next() {
            return Err(Error::DuplicateQuest(id));
        }

        Ok(Self {
            id: record.id,
            owner: record.owner,
            label: record.label,
            total_shares: record.total_shares,
            threshold: record.threshold,
            quests: record.quests,
            created_at: record.created_at,
        })
    }
}

/// Structural invariants shared by every lock, however it was built.
fn check_quests<'a, I>(total_shares: usize, threshold: usize, quests: I) -> Result<(), Error>
where
    I: ExactSizeIterator<Item = (&'a QuestCondition, &'a Share)> + Clone,
{
    shamir::check_threshold(total_shares, threshold)?;
    if quests.len() > total_shares {
        return Err(Error::TooManyQuests {
            quests: quests.len(),
            total_shares,
        });
    }

    for (condition, share) in quests.clone() {
        condition.validate()?;
        let index = share.index();
        if usize::from(index) > total_shares {
            return Err(Error::CustodialShareOutOfRange {
                index,
                total_shares,
            });
        }
    }
    if let Some(index) = quests.clone().map(|(_, s)| s.index()).duplicates().next() {
        return Err(shamir::Error::DuplicateShareIndex(index).into());
    }
    if quests.map(|(_, s)| s.len()).dedup().count() > 1 {
        return Err(shamir::Error::MalformedShare(
            "custodial shares have differing lengths".into(),
        )
        .into());
    }
    Ok(())
}

impl Lock {
    /// Build a lock from its quests, validating all structural invariants.
    ///
    /// Nothing is partially constructed: either every quest is valid and the
    /// returned lock contains all of them, or an error is returned.
    pub fn seal(
        owner: Principal,
        label: Option<String>,
        total_shares: usize,
        threshold: usize,
        quests: Vec<NewQuest>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        check_quests(
            total_shares,
            threshold,
            quests.iter().map(|q| (&q.condition, &q.share)),
        )?;

        let id = LockId::generate();
        Ok(Self {
            id,
            owner,
            label,
            // Both were bounded by check_threshold.
            total_shares: total_shares as u8,
            threshold: threshold as u8,
            quests: quests
                .into_iter()
                .map(|q| Quest::new(id, q.condition, q.share))
                .collect(),
            created_at,
        })
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn owner(&self) -> &Principal {
        &self.owner
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn total_shares(&self) -> usize {
        self.total_shares.into()
    }

    pub fn threshold(&self) -> usize {
        self.threshold.into()
    }

    pub fn quests(&self) -> &[Quest] {
        &self.quests
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn quest(&self, id: QuestId) -> Result<&Quest, Error> {
        self.quests
            .iter()
            .find(|q| q.id() == id)
            .ok_or(Error::QuestNotFound(id))
    }

    pub fn completed_quests(&self) -> usize {
        self.quests
            .iter()
            .filter(|q| q.status().is_complete())
            .count()
    }

    /// Whether enough quests have been completed to meet the threshold on
    /// their own.
    pub fn can_unlock(&self) -> bool {
        self.completed_quests() >= self.threshold()
    }

    /// Custodial shares of every completed quest.
    pub fn released_shares(&self) -> Vec<&Share> {
        self.quests
            .iter()
            .filter_map(Quest::released_share)
            .collect()
    }

    /// Fold a verdict into the status of one quest.
    pub fn apply_verdict(
        &mut self,
        quest_id: QuestId,
        verdict: QuestStatus,
    ) -> Result<Option<Transition>, Error> {
        self.quests
            .iter_mut()
            .find(|q| q.id() == quest_id)
            .map(|q| q.apply(verdict))
            .ok_or(Error::QuestNotFound(quest_id))
    }
}
