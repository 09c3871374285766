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
    lock::{Error, LockId, QuestId},
    shamir::Share,
};

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Proximity radius (in metres) used when a GEO quest does not specify one.
pub const DEFAULT_PROXIMITY_RANGE: f64 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestType {
    Geo,
    Time,
    Friend,
    Paywall,
}

impl fmt::Display for QuestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuestType::Geo => "GEO",
            QuestType::Time => "TIME",
            QuestType::Friend => "FRIEND",
            QuestType::Paywall => "PAYWALL",
        })
    }
}

impl FromStr for QuestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GEO" => Ok(QuestType::Geo),
            "TIME" => Ok(QuestType::Time),
            "FRIEND" => Ok(QuestType::Friend),
            "PAYWALL" => Ok(QuestType::Paywall),
            other => Err(format!("unknown quest type '{}'", other)),
        }
    }
}

/// Progress of a quest.
///
/// The variants are ordered, and a quest only ever moves forward through
/// them: `INCOMPLETE -> IN_PROGRESS -> COMPLETE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestStatus {
    Incomplete,
    InProgress,
    Complete,
}

impl QuestStatus {
    /// Fold a verdict into the current status. Verdicts that would move the
    /// quest backwards are ignored.
    pub fn advance(self, verdict: QuestStatus) -> QuestStatus {
        self.max(verdict)
    }

    pub fn is_complete(self) -> bool {
        self == QuestStatus::Complete
    }
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuestStatus::Incomplete => "INCOMPLETE",
            QuestStatus::InProgress => "IN_PROGRESS",
            QuestStatus::Complete => "COMPLETE",
        })
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for QuestStatus {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        *g.choose(&[
            QuestStatus::Incomplete,
            QuestStatus::InProgress,
            QuestStatus::Complete,
        ])
        .expect("non-empty choice")
    }
}

/// Arrive within `proximity_range` metres of a location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoCondition {
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_proximity_range")]
    pub proximity_range: f64,
}

fn default_proximity_range() -> f64 {
    DEFAULT_PROXIMITY_RANGE
}

/// Wait until a point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeCondition {
    pub release_date: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Have a guardian confirm the release.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FriendCondition {
    pub friend_email: String,
    #[serde(default)]
    pub friend_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Pay at least `amount` (in minor currency units).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaywallCondition {
    pub amount: u64,
    #[serde(default)]
    pub charity: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
}

/// The condition gating a quest, one record shape per [`QuestType`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "quest_type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestCondition {
    Geo(GeoCondition),
    Time(TimeCondition),
    Friend(FriendCondition),
    Paywall(PaywallCondition),
}

impl QuestCondition {
    pub fn quest_type(&self) -> QuestType {
        match self {
            QuestCondition::Geo(_) => QuestType::Geo,
            QuestCondition::Time(_) => QuestType::Time,
            QuestCondition::Friend(_) => QuestType::Friend,
            QuestCondition::Paywall(_) => QuestType::Paywall,
        }
    }

    /// Parse the transmitted `(quest_type, data)` pair into a validated
    /// condition.
    pub fn from_parts(quest_type: QuestType, data: Value) -> Result<Self, Error> {
        let invalid = |err: serde_json::Error| Error::InvalidQuestData {
            quest_type,
            reason: err.to_string(),
        };
        let condition = match quest_type {
            QuestType::Geo => QuestCondition::Geo(serde_json::from_value(data).map_err(invalid)?),
            QuestType::Time => QuestCondition::Time(serde_json::from_value(data).map_err(invalid)?),
            QuestType::Friend => {
                QuestCondition::Friend(serde_json::from_value(data).map_err(invalid)?)
            }
            QuestType::Paywall => {
                QuestCondition::Paywall(serde_json::from_value(data).map_err(invalid)?)
            }
        };
        condition.validate()?;
        Ok(condition)
    }

    /// The transmitted `data` record for this condition.
    pub fn to_data(&self) -> Value {
        match self {
            QuestCondition::Geo(geo) => json!({
                "location_name": geo.location_name,
                "latitude": geo.latitude,
                "longitude": geo.longitude,
                "proximity_range": geo.proximity_range,
            }),
            QuestCondition::Time(time) => json!({
                "release_date": time.release_date.to_rfc3339(),
                "description": time.description,
            }),
            QuestCondition::Friend(friend) => json!({
                "friend_email": friend.friend_email,
                "friend_name": friend.friend_name,
                "message": friend.message,
            }),
            QuestCondition::Paywall(paywall) => json!({
                "amount": paywall.amount,
                "charity": paywall.charity,
                "purpose": paywall.purpose,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let quest_type = self.quest_type();
        let ensure = |ok: bool, reason: &str| match ok {
            true => Ok(()),
            false => Err(Error::InvalidQuestData {
                quest_type,
                reason: reason.into(),
            }),
        };

        match self {
            QuestCondition::Geo(geo) => {
                ensure(
                    !geo.location_name.trim().is_empty(),
                    "location_name must not be empty",
                )?;
                ensure(
                    (-90.0..=90.0).contains(&geo.latitude),
                    "latitude must be within [-90, 90]",
                )?;
                ensure(
                    (-180.0..=180.0).contains(&geo.longitude),
                    "longitude must be within [-180, 180]",
                )?;
                ensure(
                    geo.proximity_range.is_finite() && geo.proximity_range > 0.0,
                    "proximity_range must be a positive number of metres",
                )
            }
            // Any timestamp is fine -- one in the past just completes on the
            // first evaluation.
            QuestCondition::Time(_) => Ok(()),
            QuestCondition::Friend(friend) => ensure(
                friend.friend_email.trim().contains('@'),
                "friend_email must be an email address",
            ),
            QuestCondition::Paywall(paywall) => {
                ensure(paywall.amount > 0, "amount must be greater than zero")
            }
        }
    }
}

/// A single condition gating the release of one custodial share.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quest {
    id: QuestId,
    lock_id: LockId,
    condition: QuestCondition,
    status: QuestStatus,
    share: Share,
}

/// A status change applied to a quest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub quest_id: QuestId,
    pub from: QuestStatus,
    pub to: QuestStatus,
}

impl Transition {
    /// Whether this transition exposed the quest's custodial share.
    pub fn releases_share(&self) -> bool {
        !self.from.is_complete() && self.to.is_complete()
    }
}

impl Quest {
    pub(super) fn new(lock_id: LockId, condition: QuestCondition, share: Share) -> Self {
        Self {
            id: QuestId::generate(),
            lock_id,
            condition,
            status: QuestStatus::Incomplete,
            share,
        }
    }

    pub fn id(&self) -> QuestId {
        self.id
    }

    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }

    pub fn condition(&self) -> &QuestCondition {
        &self.condition
    }

    pub fn quest_type(&self) -> QuestType {
        self.condition.quest_type()
    }

    pub fn status(&self) -> QuestStatus {
        self.status
    }

    pub(super) fn share(&self) -> &Share {
        &self.share
    }

    /// The custodial share, but only once the quest has been completed.
    pub fn released_share(&self) -> Option<&Share> {
        match self.status {
            QuestStatus::Complete => Some(&self.share),
            _ => None,
        }
    }

    /// Apply a verdict, returning the transition if the status changed.
    pub(super) fn apply(&mut self, verdict: QuestStatus) -> Option<Transition> {
        let from = self.status;
        let to = from.advance(verdict);
        if from == to {
            return None;
        }
        self.status = to;
        Some(Transition {
            quest_id: self.id,
            from,
            to,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn geo_data() -> Value {
        json!({
            "location_name": "Bag End",
            "latitude": -37.8723,
            "longitude": 175.6829,
        })
    }

    #[quickcheck]
    fn status_monotonic(verdicts: Vec<QuestStatus>) -> bool {
        let mut quest = Quest::new(
            LockId::generate(),
            QuestCondition::from_parts(QuestType::Geo, geo_data()).unwrap(),
            Share::new(1, b"x").unwrap(),
        );

        let mut seen_complete = false;
        verdicts.into_iter().all(|verdict| {
            let before = quest.status();
            let transition = quest.apply(verdict);
            let after = quest.status();
            let ok = after >= before
                && !(seen_complete && !after.is_complete())
                && transition.map_or(before == after, |t| t.from == before && t.to == after)
                && quest.released_share().is_some() == after.is_complete();
            seen_complete |= after.is_complete();
            ok
        })
    }

    #[test]
    fn share_released_exactly_once() {
        let mut quest = Quest::new(
            LockId::generate(),
            QuestCondition::from_parts(QuestType::Geo, geo_data()).unwrap(),
            Share::new(4, b"custodial").unwrap(),
        );
        assert!(quest.released_share().is_none());

        let t = quest.apply(QuestStatus::InProgress).unwrap();
        assert!(!t.releases_share());
        assert!(quest.released_share().is_none());

        let t = quest.apply(QuestStatus::Complete).unwrap();
        assert!(t.releases_share());
        assert_eq!(quest.released_share().map(Share::index), Some(4));

        assert_eq!(quest.apply(QuestStatus::Complete), None);
        assert_eq!(quest.apply(QuestStatus::Incomplete), None);
        assert_eq!(quest.status(), QuestStatus::Complete);
    }

    #[test]
    fn geo_default_proximity() {
        match QuestCondition::from_parts(QuestType::Geo, geo_data()).unwrap() {
            QuestCondition::Geo(geo) => assert_eq!(geo.proximity_range, DEFAULT_PROXIMITY_RANGE),
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn invalid_condition_data() {
        let cases = [
            (QuestType::Geo, json!({"location_name": "", "latitude": 0.0, "longitude": 0.0})),
            (QuestType::Geo, json!({"location_name": "x", "latitude": 91.0, "longitude": 0.0})),
            (QuestType::Geo, json!({"location_name": "x", "latitude": 0.0, "longitude": -181.0})),
            (
                QuestType::Geo,
                json!({"location_name": "x", "latitude": 0.0, "longitude": 0.0, "proximity_range": 0.0}),
            ),
            (QuestType::Geo, json!({"latitude": 0.0, "longitude": 0.0})),
            (QuestType::Time, json!({"release_date": "next tuesday"})),
            (QuestType::Friend, json!({"friend_email": "samwise"})),
            (QuestType::Paywall, json!({"amount": 0})),
            (QuestType::Paywall, json!({"amount": "ten"})),
        ];
        for (quest_type, data) in cases {
            assert!(
                matches!(
                    QuestCondition::from_parts(quest_type, data.clone()),
                    Err(Error::InvalidQuestData { quest_type: t, .. }) if t == quest_type
                ),
                "{} {} should be rejected",
                quest_type,
                data
            );
        }
    }

    #[test]
    fn condition_data_roundtrip() {
        let conditions = [
            QuestCondition::from_parts(QuestType::Geo, geo_data()).unwrap(),
            QuestCondition::from_parts(
                QuestType::Time,
                json!({"release_date": "2030-01-01T00:00:00Z", "description": "new year"}),
            )
            .unwrap(),
            QuestCondition::from_parts(
                QuestType::Friend,
                json!({"friend_email": "sam@shire.example", "friend_name": "Sam"}),
            )
            .unwrap(),
            QuestCondition::from_parts(QuestType::Paywall, json!({"amount": 500})).unwrap(),
        ];
        for condition in conditions {
            let reparsed =
                QuestCondition::from_parts(condition.quest_type(), condition.to_data()).unwrap();
            assert_eq!(condition, reparsed);
        }
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&QuestStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert_eq!(
            serde_json::from_str::<QuestType>("\"PAYWALL\"").unwrap(),
            QuestType::Paywall
        );
        assert_eq!(QuestStatus::Complete.to_string(), "COMPLETE");
        assert_eq!(QuestType::Geo.to_string(), "GEO");
        assert_eq!("friend".parse::<QuestType>().unwrap(), QuestType::Friend);
        assert!("treasure".parse::<QuestType>().is_err());
    }
}
