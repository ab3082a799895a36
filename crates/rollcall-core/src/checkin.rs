//! Identity check-in: match a captured face, then mark the ledger.

use crate::ledger::{AttendanceLedger, AttendanceRecord, LedgerError, MarkOutcome};
use crate::matcher::{IdentityMatcher, MatchOutcome};
use crate::registry::IdentityRegistry;
use crate::types::FaceCapture;
use chrono::NaiveDateTime;

#[derive(Debug, Clone, PartialEq)]
pub enum CheckIn {
    Marked {
        identity: String,
        distance: f32,
        record: AttendanceRecord,
    },
    Duplicate {
        identity: String,
        distance: f32,
        record: AttendanceRecord,
    },
    Unrecognized {
        nearest: String,
        best_distance: f32,
    },
    /// Nothing enrolled to compare against.
    NoCandidates,
    NoFace,
    MultipleFaces {
        count: usize,
    },
}

/// Run one check-in. Only a single detected face reaches the matcher, and
/// only an accepted match reaches the ledger.
pub fn check_in(
    capture: FaceCapture,
    registry: &IdentityRegistry,
    matcher: &IdentityMatcher,
    ledger: &AttendanceLedger,
    at: NaiveDateTime,
) -> Result<CheckIn, LedgerError> {
    let embedding = match capture {
        FaceCapture::Single(embedding) => embedding,
        FaceCapture::NoFace => return Ok(CheckIn::NoFace),
        FaceCapture::MultipleFaces(count) => return Ok(CheckIn::MultipleFaces { count }),
    };

    let (identity, distance) = match matcher.find_match(&embedding, registry) {
        MatchOutcome::Accepted { identity, distance } => (identity, distance),
        MatchOutcome::Rejected {
            nearest,
            best_distance,
        } => {
            tracing::info!(%nearest, best_distance, "face not recognised");
            return Ok(CheckIn::Unrecognized {
                nearest,
                best_distance,
            });
        }
        MatchOutcome::NoCandidates => return Ok(CheckIn::NoCandidates),
    };

    Ok(match ledger.mark(&identity, at)? {
        MarkOutcome::Created(record) => CheckIn::Marked {
            identity,
            distance,
            record,
        },
        MarkOutcome::Duplicate(record) => CheckIn::Duplicate {
            identity,
            distance,
            record,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;
    use chrono::{Local, NaiveDate};

    fn registry_with_alice() -> (IdentityRegistry, Embedding) {
        let alice = Embedding::new((0..512).map(|i| (i as f32 * 0.37).sin() / 16.0).collect());
        let mut registry = IdentityRegistry::default();
        registry.append("alice_1", alice.clone());
        (registry, alice)
    }

    #[test]
    fn test_exact_match_marks_today() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        let (registry, alice) = registry_with_alice();
        let now = Local::now().naive_local();

        let result = check_in(
            FaceCapture::Single(alice),
            &registry,
            &IdentityMatcher::default(),
            &ledger,
            now,
        )
        .unwrap();

        match result {
            CheckIn::Marked { identity, distance, .. } => {
                assert_eq!(identity, "alice_1");
                assert_eq!(distance, 0.0);
            }
            other => panic!("expected mark, got {other:?}"),
        }
        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "alice_1");
        assert_eq!(records[0].day, Some(now.date()));
    }

    #[test]
    fn test_repeat_same_day_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        let (registry, alice) = registry_with_alice();
        let matcher = IdentityMatcher::default();
        let day = NaiveDate::from_ymd_opt(2024, 9, 3).unwrap();

        let first = check_in(
            FaceCapture::Single(alice.clone()),
            &registry,
            &matcher,
            &ledger,
            day.and_hms_opt(8, 0, 0).unwrap(),
        )
        .unwrap();
        assert!(matches!(first, CheckIn::Marked { .. }));

        let second = check_in(
            FaceCapture::Single(alice),
            &registry,
            &matcher,
            &ledger,
            day.and_hms_opt(13, 30, 0).unwrap(),
        )
        .unwrap();
        assert!(matches!(second, CheckIn::Duplicate { ref identity, .. } if identity == "alice_1"));
        assert_eq!(ledger.records().unwrap().len(), 1);
    }

    #[test]
    fn test_negative_outcomes_never_touch_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        let pristine = std::fs::read(ledger.path()).unwrap();
        let (registry, alice) = registry_with_alice();
        let matcher = IdentityMatcher::default();
        let now = Local::now().naive_local();

        let far = Embedding::new(alice.values().iter().map(|v| v + 1.0).collect());
        let cases = [
            (FaceCapture::NoFace, &registry),
            (FaceCapture::MultipleFaces(2), &registry),
            (FaceCapture::Single(far), &registry),
        ];
        let outcomes: Vec<_> = cases
            .into_iter()
            .map(|(capture, reg)| check_in(capture, reg, &matcher, &ledger, now).unwrap())
            .collect();
        assert_eq!(outcomes[0], CheckIn::NoFace);
        assert_eq!(outcomes[1], CheckIn::MultipleFaces { count: 2 });
        assert!(matches!(
            outcomes[2],
            CheckIn::Unrecognized { ref nearest, best_distance } if nearest == "alice_1" && best_distance >= 0.5
        ));

        let empty = IdentityRegistry::default();
        assert_eq!(
            check_in(FaceCapture::Single(alice), &empty, &matcher, &ledger, now).unwrap(),
            CheckIn::NoCandidates
        );
        assert!(ledger.records().unwrap().is_empty());
        assert_eq!(std::fs::read(ledger.path()).unwrap(), pristine);
    }
}
