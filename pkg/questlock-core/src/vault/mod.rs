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

//! The vault: stores locks on behalf of their owners and decides when each
//! custodial share may be released.

mod client;
mod store;
mod view;

pub use client::{
    generate_secret, generate_secret_with_rng, prepare_lock, prepare_lock_with_rng, recover,
    PreparedLock,
};
pub use store::{LockStore, MemoryStore, Versioned};
pub use view::{CreateLockRequest, CreateQuestRequest, LockView, QuestView};

use crate::{
    config::Policy,
    lock::{
        self,
        evaluate::{evaluate, Clock, Evidence},
        quest::{Quest, QuestCondition, QuestStatus},
        Lock, LockId, Principal, QuestId,
    },
    shamir::{self, Share},
};

use std::sync::Arc;

use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lock(#[from] lock::Error),

    #[error(transparent)]
    Shamir(#[from] shamir::Error),

    #[error("lock {0} not found")]
    LockNotFound(LockId),

    #[error("lock {0} belongs to another principal")]
    NotOwner(LockId),

    #[error("lock {0} has already been created and cannot be replaced")]
    LockSealedImmutable(LockId),

    #[error("lock {lock_id} was modified concurrently (expected version {expected}, found {found})")]
    ConcurrentModification {
        lock_id: LockId,
        expected: u64,
        found: u64,
    },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("insufficient shares to recover secret: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Owner-facing operations on locks.
pub struct VaultService {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    policy: Policy,
}

impl VaultService {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>, policy: Policy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Create a lock and all of its quests in a single step. If any quest is
    /// invalid nothing is stored.
    pub fn create_lock(
        &self,
        owner: &Principal,
        request: &CreateLockRequest,
    ) -> Result<LockView, Error> {
        let quests = request.quests.len();
        if quests == 0 || quests > self.policy.max_quests {
            return Err(Error::PolicyViolation(format!(
                "a lock needs between 1 and {} quests, got {}",
                self.policy.max_quests, quests
            )));
        }

        let quests = request
            .quests
            .iter()
            .map(CreateQuestRequest::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let lock = Lock::seal(
            owner.clone(),
            request.label.clone(),
            request.total_shares,
            request.threshold,
            quests,
            self.clock.now(),
        )?;

        let view = LockView::from(&lock);
        self.store.insert(lock)?;
        info!(
            lock_id = %view.id,
            %owner,
            total_shares = view.total_shares,
            threshold = view.threshold,
            quests = view.quests.len(),
            "created lock"
        );
        Ok(view)
    }

    /// All locks owned by `owner`.
    pub fn query_locks(&self, owner: &Principal) -> Result<Vec<LockView>, Error> {
        Ok(self
            .store
            .list_by_owner(owner)?
            .iter()
            .map(LockView::from)
            .collect())
    }

    pub fn get_lock(&self, owner: &Principal, lock_id: LockId) -> Result<LockView, Error> {
        Ok(LockView::from(&self.fetch(owner, lock_id)?.value))
    }

    /// Mark a quest as being attempted.
    pub fn register_attempt(
        &self,
        owner: &Principal,
        lock_id: LockId,
        quest_id: QuestId,
    ) -> Result<QuestView, Error> {
        self.transition(owner, lock_id, quest_id, |_| Ok(QuestStatus::InProgress))
    }

    /// Evaluate `evidence` against a quest and record the verdict.
    pub fn evaluate_quest(
        &self,
        owner: &Principal,
        lock_id: LockId,
        quest_id: QuestId,
        evidence: &Evidence,
    ) -> Result<QuestView, Error> {
        let now = self.clock.now();
        self.transition(owner, lock_id, quest_id, |quest| {
            Ok(evaluate(quest.condition(), evidence, now)?)
        })
    }

    /// Complete every TIME quest whose release date has passed, across all
    /// locks. Returns how many quests were completed.
    ///
    /// Locks that are modified concurrently are skipped and picked up again
    /// on the next run.
    pub fn evaluate_due_time_quests(&self) -> Result<usize, Error> {
        let now = self.clock.now();
        let mut completed = 0;

        for Versioned { version, value: lock } in self.store.list_all()? {
            let mut due = Vec::new();
            for quest in lock.quests() {
                if quest.status().is_complete()
                    || !matches!(quest.condition(), QuestCondition::Time(_))
                {
                    continue;
                }
                if evaluate(quest.condition(), &Evidence::None, now)?.is_complete() {
                    due.push((quest.id(), QuestStatus::Complete));
                }
            }
            if due.is_empty() {
                continue;
            }

            match self.store.update_statuses(lock.id(), version, &due) {
                Ok(_) => {
                    for (quest_id, _) in &due {
                        info!(lock_id = %lock.id(), %quest_id, "time quest completed, custodial share released");
                    }
                    completed += due.len();
                }
                Err(Error::ConcurrentModification { .. }) => {
                    warn!(lock_id = %lock.id(), "lock modified during time sweep, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        debug!(completed, "time sweep finished");
        Ok(completed)
    }

    /// Whether the completed quests of a lock meet its threshold.
    pub fn can_unlock(&self, owner: &Principal, lock_id: LockId) -> Result<bool, Error> {
        Ok(self.fetch(owner, lock_id)?.value.can_unlock())
    }

    /// Custodial shares released by the completed quests of a lock.
    pub fn released_shares(&self, owner: &Principal, lock_id: LockId) -> Result<Vec<Share>, Error> {
        Ok(self
            .fetch(owner, lock_id)?
            .value
            .released_shares()
            .into_iter()
            .cloned()
            .collect())
    }

    fn fetch(&self, owner: &Principal, lock_id: LockId) -> Result<Versioned<Lock>, Error> {
        let record = self
            .store
            .get(lock_id)?
            .ok_or(Error::LockNotFound(lock_id))?;
        if record.value.owner() != owner {
            warn!(%lock_id, %owner, "principal attempted to access a lock it does not own");
            return Err(Error::NotOwner(lock_id));
        }
        Ok(record)
    }

    fn transition<F>(
        &self,
        owner: &Principal,
        lock_id: LockId,
        quest_id: QuestId,
        verdict: F,
    ) -> Result<QuestView, Error>
    where
        F: FnOnce(&Quest) -> Result<QuestStatus, Error>,
    {
        let Versioned {
            version,
            value: mut lock,
        } = self.fetch(owner, lock_id)?;
        let verdict = verdict(lock.quest(quest_id)?)?;

        match lock.apply_verdict(quest_id, verdict)? {
            None => debug!(%lock_id, %quest_id, %verdict, "quest status unchanged"),
            Some(transition) => {
                if let Err(err) = self
                    .store
                    .update_statuses(lock_id, version, &[(quest_id, verdict)])
                {
                    warn!(%lock_id, %quest_id, error = %err, "failed to record quest verdict");
                    return Err(err);
                }
                info!(
                    %lock_id,
                    %quest_id,
                    from = %transition.from,
                    to = %transition.to,
                    "quest status changed"
                );
                if transition.releases_share() {
                    info!(%lock_id, %quest_id, "custodial share released");
                }
            }
        }
        Ok(QuestView::from(lock.quest(quest_id)?))
    }
}
