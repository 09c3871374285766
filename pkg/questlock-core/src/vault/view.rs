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

//! The records exchanged with callers of the vault.

use crate::{
    lock::{
        quest::{Quest, QuestCondition, QuestStatus, QuestType},
        Lock, LockId, NewQuest, QuestId,
    },
    shamir::Share,
    vault::Error,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A lock as seen by its owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockView {
    pub id: LockId,
    pub label: Option<String>,
    pub total_shares: usize,
    pub threshold: usize,
    pub created_at: DateTime<Utc>,
    pub can_unlock: bool,
    pub quests: Vec<QuestView>,
}

/// A quest as seen by the lock owner. `share` is only present once the quest
/// is `COMPLETE`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestView {
    pub id: QuestId,
    pub lock_id: LockId,
    pub quest_type: QuestType,
    pub status: QuestStatus,
    pub data: Value,
    pub share: Option<String>,
}

impl From<&Quest> for QuestView {
    fn from(quest: &Quest) -> Self {
        Self {
            id: quest.id(),
            lock_id: quest.lock_id(),
            quest_type: quest.quest_type(),
            status: quest.status(),
            data: quest.condition().to_data(),
            share: quest.released_share().map(Share::encode),
        }
    }
}

impl From<&Lock> for LockView {
    fn from(lock: &Lock) -> Self {
        Self {
            id: lock.id(),
            label: lock.label().map(str::to_owned),
            total_shares: lock.total_shares(),
            threshold: lock.threshold(),
            created_at: lock.created_at(),
            can_unlock: lock.can_unlock(),
            quests: lock.quests().iter().map(QuestView::from).collect(),
        }
    }
}

impl LockView {
    /// Decode the custodial shares released so far.
    pub fn released_shares(&self) -> Result<Vec<Share>, Error> {
        self.quests
            .iter()
            .filter_map(|quest| quest.share.as_deref())
            .map(|share| Share::decode(share).map_err(Error::from))
            .collect()
    }
}

/// Request to create a lock. Every quest carries the custodial share it will
/// guard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateLockRequest {
    #[serde(default)]
    pub label: Option<String>,
    pub total_shares: usize,
    pub threshold: usize,
    pub quests: Vec<CreateQuestRequest>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateQuestRequest {
    pub quest_type: QuestType,
    pub data: Value,
    pub share: String,
}

impl CreateQuestRequest {
    pub fn new(condition: &QuestCondition, share: &Share) -> Self {
        Self {
            quest_type: condition.quest_type(),
            data: condition.to_data(),
            share: share.encode(),
        }
    }

    /// Parse and validate the request into a quest ready to be sealed.
    pub fn parse(&self) -> Result<NewQuest, Error> {
        Ok(NewQuest {
            condition: QuestCondition::from_parts(self.quest_type, self.data.clone())?,
            share: Share::decode(&self.share)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{lock::Principal, shamir::split};

    use serde_json::json;

    #[test]
    fn share_hidden_until_complete() {
        let shares = split(b"open sesame", 3, 2).unwrap();
        let request = CreateQuestRequest {
            quest_type: QuestType::Friend,
            data: json!({"friend_email": "ali@baba.example"}),
            share: shares[2].encode(),
        };
        let mut lock = Lock::seal(
            Principal::from("ali"),
            None,
            3,
            2,
            vec![request.parse().unwrap()],
            Utc::now(),
        )
        .unwrap();
        let quest = lock.quests()[0].id();

        let view = LockView::from(&lock);
        assert_eq!(view.quests[0].share, None);
        assert_eq!(view.quests[0].quest_type, QuestType::Friend);
        assert_eq!(view.quests[0].data["friend_email"], "ali@baba.example");
        assert!(view.released_shares().unwrap().is_empty());

        lock.apply_verdict(quest, QuestStatus::InProgress).unwrap();
        assert_eq!(LockView::from(&lock).quests[0].share, None);

        lock.apply_verdict(quest, QuestStatus::Complete).unwrap();
        let view = LockView::from(&lock);
        assert_eq!(view.quests[0].share, Some(shares[2].encode()));
        assert_eq!(view.released_shares().unwrap(), vec![shares[2].clone()]);
    }

    #[test]
    fn view_json_shape() {
        let shares = split(b"x", 2, 2).unwrap();
        let lock = Lock::seal(
            Principal::from("ali"),
            Some("cave".into()),
            2,
            2,
            vec![CreateQuestRequest {
                quest_type: QuestType::Paywall,
                data: json!({"amount": 40}),
                share: shares[1].encode(),
            }
            .parse()
            .unwrap()],
            Utc::now(),
        )
        .unwrap();

        let json = serde_json::to_value(LockView::from(&lock)).unwrap();
        assert_eq!(json["label"], "cave");
        assert_eq!(json["can_unlock"], false);
        assert_eq!(json["quests"][0]["quest_type"], "PAYWALL");
        assert_eq!(json["quests"][0]["status"], "INCOMPLETE");
        assert_eq!(json["quests"][0]["data"]["amount"], 40);
        assert!(json["quests"][0]["share"].is_null());
    }

    #[test]
    fn bad_request_share() {
        let request = CreateQuestRequest {
            quest_type: QuestType::Paywall,
            data: json!({"amount": 40}),
            share: "definitely not a share".into(),
        };
        assert!(matches!(request.parse(), Err(Error::Shamir(_))));
    }
}
