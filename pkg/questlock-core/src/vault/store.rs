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
    lock::{quest::QuestStatus, Lock, LockId, Principal, QuestId},
    vault::Error,
};

use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// A stored value together with its version. The version is bumped on every
/// successful update.
#[derive(Clone, Debug)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Persistence for locks.
///
/// Implementations must make [`insert`](LockStore::insert) all-or-nothing and
/// [`update_statuses`](LockStore::update_statuses) a compare-and-swap on the
/// record version.
pub trait LockStore: Send + Sync {
    /// Store a newly sealed lock. Fails with `LockSealedImmutable` if a lock
    /// with the same id already exists.
    fn insert(&self, lock: Lock) -> Result<(), Error>;

    fn get(&self, id: LockId) -> Result<Option<Versioned<Lock>>, Error>;

    fn list_by_owner(&self, owner: &Principal) -> Result<Vec<Lock>, Error>;

    fn list_all(&self) -> Result<Vec<Versioned<Lock>>, Error>;

    /// Apply status verdicts to quests of a lock, provided the record is still
    /// at `expected_version`. Returns the new version.
    fn update_statuses(
        &self,
        id: LockId,
        expected_version: u64,
        verdicts: &[(QuestId, QuestStatus)],
    ) -> Result<u64, Error>;
}

/// An in-memory [`LockStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    locks: RwLock<BTreeMap<LockId, Versioned<Lock>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from previously persisted locks.
    pub fn from_locks<I: IntoIterator<Item = Lock>>(locks: I) -> Self {
        Self {
            locks: RwLock::new(
                locks
                    .into_iter()
                    .map(|lock| (lock.id(), Versioned { version: 0, value: lock }))
                    .collect(),
            ),
        }
    }

    /// Copy out every stored lock, ordered by id.
    pub fn snapshot(&self) -> Result<Vec<Lock>, Error> {
        Ok(self.read()?.values().map(|v| v.value.clone()).collect())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<LockId, Versioned<Lock>>>, Error> {
        self.locks
            .read()
            .map_err(|_| Error::Storage("lock table poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<LockId, Versioned<Lock>>>, Error> {
        self.locks
            .write()
            .map_err(|_| Error::Storage("lock table poisoned".into()))
    }
}

impl LockStore for MemoryStore {
    fn insert(&self, lock: Lock) -> Result<(), Error> {
        match self.write()?.entry(lock.id()) {
            Entry::Occupied(entry) => Err(Error::LockSealedImmutable(*entry.key())),
            Entry::Vacant(entry) => {
                entry.insert(Versioned {
                    version: 0,
                    value: lock,
                });
                Ok(())
            }
        }
    }

    fn get(&self, id: LockId) -> Result<Option<Versioned<Lock>>, Error> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn list_by_owner(&self, owner: &Principal) -> Result<Vec<Lock>, Error> {
        Ok(self
            .read()?
            .values()
            .filter(|v| v.value.owner() == owner)
            .map(|v| v.value.clone())
            .collect())
    }

    fn list_all(&self) -> Result<Vec<Versioned<Lock>>, Error> {
        Ok(self.read()?.values().cloned().collect())
    }

    fn update_statuses(
        &self,
        id: LockId,
        expected_version: u64,
        verdicts: &[(QuestId, QuestStatus)],
    ) -> Result<u64, Error> {
        let mut locks = self.write()?;
        let record = locks.get_mut(&id).ok_or(Error::LockNotFound(id))?;
        if record.version != expected_version {
            return Err(Error::ConcurrentModification {
                lock_id: id,
                expected: expected_version,
                found: record.version,
            });
        }

        // Apply to a copy so a bad quest id leaves the record untouched.
        let mut lock = record.value.clone();
        for (quest_id, verdict) in verdicts {
            lock.apply_verdict(*quest_id, *verdict)?;
        }
        record.value = lock;
        record.version += 1;
        Ok(record.version)
    }
}
