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

//! Deciding whether a piece of evidence satisfies a quest condition.

use crate::lock::{
    quest::{QuestCondition, QuestStatus},
    Error,
};

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius (IUGG), in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|poison| poison.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(|poison| poison.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Great-circle distance between two points in metres (haversine formula).
pub fn distance(a: Coordinates, b: Coordinates) -> f64 {
    let (lat_a, lat_b) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat_b - lat_a;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Evidence submitted in an attempt to complete a quest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    None,
    Location { latitude: f64, longitude: f64 },
    GuardianConfirmation { guardian: String },
    Payment { amount: u64 },
}

impl Evidence {
    pub fn kind(&self) -> &'static str {
        match self {
            Evidence::None => "none",
            Evidence::Location { .. } => "location",
            Evidence::GuardianConfirmation { .. } => "guardian_confirmation",
            Evidence::Payment { .. } => "payment",
        }
    }
}

/// Produce a verdict for `condition` given `evidence`, as of `now`.
///
/// Missing evidence yields `INCOMPLETE` and evidence that falls short yields
/// `IN_PROGRESS`. TIME quests ignore evidence entirely. The verdict is not
/// applied to anything; callers fold it into the quest's current status.
pub fn evaluate(
    condition: &QuestCondition,
    evidence: &Evidence,
    now: DateTime<Utc>,
) -> Result<QuestStatus, Error> {
    let mismatch = || Error::EvidenceMismatch {
        quest_type: condition.quest_type(),
        evidence: evidence.kind(),
    };
    let verdict = |satisfied: bool| match satisfied {
        true => QuestStatus::Complete,
        false => QuestStatus::InProgress,
    };

    match condition {
        QuestCondition::Time(time) => Ok(match now >= time.release_date {
            true => QuestStatus::Complete,
            false => QuestStatus::Incomplete,
        }),
        QuestCondition::Geo(geo) => match *evidence {
            Evidence::None => Ok(QuestStatus::Incomplete),
            Evidence::Location {
                latitude,
                longitude,
            } => {
                let target = Coordinates {
                    latitude: geo.latitude,
                    longitude: geo.longitude,
                };
                let here = Coordinates {
                    latitude,
                    longitude,
                };
                // NaN coordinates compare false and never satisfy the quest.
                Ok(verdict(distance(target, here) <= geo.proximity_range))
            }
            _ => Err(mismatch()),
        },
        QuestCondition::Friend(friend) => match evidence {
            Evidence::None => Ok(QuestStatus::Incomplete),
            Evidence::GuardianConfirmation { guardian } => Ok(verdict(
                guardian
                    .trim()
                    .eq_ignore_ascii_case(friend.friend_email.trim()),
            )),
            _ => Err(mismatch()),
        },
        QuestCondition::Paywall(paywall) => match *evidence {
            Evidence::None => Ok(QuestStatus::Incomplete),
            Evidence::Payment { amount } => Ok(verdict(amount >= paywall.amount)),
            _ => Err(mismatch()),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lock::quest::{FriendCondition, GeoCondition, PaywallCondition, TimeCondition};

    fn eiffel() -> QuestCondition {
        QuestCondition::Geo(GeoCondition {
            location_name: "Eiffel Tower".into(),
            latitude: 48.8584,
            longitude: 2.2945,
            proximity_range: 100.0,
        })
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn haversine_known_distances() {
        let paris = Coordinates {
            latitude: 48.8566,
            longitude: 2.3522,
        };
        let london = Coordinates {
            latitude: 51.5074,
            longitude: -0.1278,
        };
        let d = distance(paris, london);
        assert!((d - 343_900.0).abs() < 1_000.0, "paris-london = {}", d);
        assert_eq!(distance(paris, paris), 0.0);

        // A quarter of the way around the equator.
        let quarter = distance(
            Coordinates {
                latitude: 0.0,
                longitude: 0.0,
            },
            Coordinates {
                latitude: 0.0,
                longitude: 90.0,
            },
        );
        assert!((quarter - EARTH_RADIUS_M * std::f64::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[quickcheck]
    fn distance_symmetric(a: (i16, i16), b: (i16, i16)) -> bool {
        let point = |(lat, lon): (i16, i16)| Coordinates {
            latitude: f64::from(lat % 90),
            longitude: f64::from(lon % 180),
        };
        let (a, b) = (point(a), point(b));
        let (ab, ba) = (distance(a, b), distance(b, a));
        ab >= 0.0 && (ab - ba).abs() < 1e-6
    }

    #[test]
    fn geo_verdicts() {
        let now = Utc::now();
        assert_eq!(
            evaluate(&eiffel(), &Evidence::None, now).unwrap(),
            QuestStatus::Incomplete
        );
        assert_eq!(
            evaluate(
                &eiffel(),
                &Evidence::Location {
                    latitude: 48.8583,
                    longitude: 2.2944,
                },
                now
            )
            .unwrap(),
            QuestStatus::Complete
        );
        // Notre-Dame is about 4km away.
        assert_eq!(
            evaluate(
                &eiffel(),
                &Evidence::Location {
                    latitude: 48.8530,
                    longitude: 2.3499,
                },
                now
            )
            .unwrap(),
            QuestStatus::InProgress
        );
        assert_eq!(
            evaluate(
                &eiffel(),
                &Evidence::Location {
                    latitude: f64::NAN,
                    longitude: 2.2945,
                },
                now
            )
            .unwrap(),
            QuestStatus::InProgress
        );
    }

    #[test]
    fn time_verdicts() {
        let quest = QuestCondition::Time(TimeCondition {
            release_date: at("2030-01-01T00:00:00Z"),
            description: None,
        });
        let clock = ManualClock::new(at("2029-12-31T23:59:59Z"));

        assert_eq!(
            evaluate(&quest, &Evidence::None, clock.now()).unwrap(),
            QuestStatus::Incomplete
        );
        // Evidence is irrelevant for TIME quests.
        assert_eq!(
            evaluate(&quest, &Evidence::Payment { amount: 1 }, clock.now()).unwrap(),
            QuestStatus::Incomplete
        );

        clock.advance(Duration::seconds(1));
        assert_eq!(
            evaluate(&quest, &Evidence::None, clock.now()).unwrap(),
            QuestStatus::Complete
        );

        clock.set(at("2031-06-01T12:00:00Z"));
        assert_eq!(
            evaluate(&quest, &Evidence::None, clock.now()).unwrap(),
            QuestStatus::Complete
        );
    }

    #[test]
    fn friend_verdicts() {
        let quest = QuestCondition::Friend(FriendCondition {
            friend_email: "sam@shire.example".into(),
            friend_name: Some("Sam".into()),
            message: None,
        });
        let now = Utc::now();
        let confirm = |guardian: &str| Evidence::GuardianConfirmation {
            guardian: guardian.into(),
        };

        assert_eq!(
            evaluate(&quest, &confirm(" Sam@Shire.example "), now).unwrap(),
            QuestStatus::Complete
        );
        assert_eq!(
            evaluate(&quest, &confirm("gollum@misty.example"), now).unwrap(),
            QuestStatus::InProgress
        );
        assert_eq!(
            evaluate(&quest, &Evidence::None, now).unwrap(),
            QuestStatus::Incomplete
        );
    }

    #[test]
    fn paywall_verdicts() {
        let quest = QuestCondition::Paywall(PaywallCondition {
            amount: 500,
            charity: Some("Red Cross".into()),
            purpose: None,
        });
        let now = Utc::now();

        assert_eq!(
            evaluate(&quest, &Evidence::Payment { amount: 499 }, now).unwrap(),
            QuestStatus::InProgress
        );
        assert_eq!(
            evaluate(&quest, &Evidence::Payment { amount: 500 }, now).unwrap(),
            QuestStatus::Complete
        );
        assert_eq!(
            evaluate(&quest, &Evidence::Payment { amount: 10_000 }, now).unwrap(),
            QuestStatus::Complete
        );
    }

    #[test]
    fn mismatched_evidence() {
        let err = evaluate(&eiffel(), &Evidence::Payment { amount: 500 }, Utc::now())
            .expect_err("payment cannot satisfy a GEO quest");
        assert!(matches!(
            err,
            Error::EvidenceMismatch {
                evidence: "payment",
                ..
            }
        ));
    }

    #[test]
    fn evidence_wire_format() {
        let evidence: Evidence =
            serde_json::from_str(r#"{"kind": "location", "latitude": 1.5, "longitude": -2}"#)
                .unwrap();
        assert_eq!(
            evidence,
            Evidence::Location {
                latitude: 1.5,
                longitude: -2.0,
            }
        );
        let evidence: Evidence = serde_json::from_str(r#"{"kind": "none"}"#).unwrap();
        assert_eq!(evidence, Evidence::None);
    }
}
