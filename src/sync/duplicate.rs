//! Duplicate detection.
//!
//! A candidate record is scored against existing ones on four signals:
//! invoice number, total, client data and creation time. The weighted sum
//! lands in [0, 1] and is compared against two thresholds:
//!
//! ```text
//! score > skip_threshold               → Skip   (reject the candidate)
//! merge_threshold < score <= skip      → Merge  (admit, but flag it)
//! score <= merge_threshold             → not a duplicate
//! ```
//!
//! Scoring is symmetric, so the order of the two records never matters.

use serde::Serialize;

use crate::config::DuplicateSettings;
use crate::error::{Error, Result};
use crate::model::{InvoicePayload, Record};
use crate::storage::SqliteStorage;
use crate::validate::{similarity_ratio, validate_invoice};

/// What to do with a likely duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAction {
    Skip,
    Merge,
}

/// The best match found for a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateVerdict {
    pub existing_id: String,
    pub score: f64,
    pub action: DuplicateAction,
}

/// Weighted-similarity duplicate detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateDetector {
    settings: DuplicateSettings,
}

impl DuplicateDetector {
    #[must_use]
    pub const fn new(settings: DuplicateSettings) -> Self {
        Self { settings }
    }

    /// Similarity of two records in [0, 1].
    #[must_use]
    pub fn score(&self, a: &Record, b: &Record) -> f64 {
        let w = &self.settings.weights;
        let score = w.invoice_number * number_similarity(&a.payload, &b.payload)
            + w.total_amount * amount_similarity(a.payload.total_amount, b.payload.total_amount)
            + w.client * client_similarity(&a.payload, &b.payload)
            + w.created_at
                * time_similarity(a.created_at, b.created_at, self.settings.half_life_secs);
        score.clamp(0.0, 1.0)
    }

    /// Map a score to an action.
    #[must_use]
    pub fn classify(&self, score: f64) -> Option<DuplicateAction> {
        if score > self.settings.skip_threshold {
            Some(DuplicateAction::Skip)
        } else if score > self.settings.merge_threshold {
            Some(DuplicateAction::Merge)
        } else {
            None
        }
    }

    /// Find the strongest duplicate of `candidate` among `existing`.
    ///
    /// The candidate itself (same id) is ignored. Equal scores go to the
    /// lower id so the result doesn't depend on iteration order.
    #[must_use]
    pub fn detect(&self, candidate: &Record, existing: &[Record]) -> Option<DuplicateVerdict> {
        let mut best: Option<(&Record, f64)> = None;

        for other in existing.iter().filter(|r| r.id != candidate.id) {
            let score = self.score(candidate, other);
            let better = match best {
                None => true,
                Some((current, s)) => score > s || (score == s && other.id < current.id),
            };
            if better {
                best = Some((other, score));
            }
        }

        let (other, score) = best?;
        self.classify(score).map(|action| DuplicateVerdict {
            existing_id: other.id.clone(),
            score,
            action,
        })
    }
}

/// A record admitted to the store.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub record: Record,
    /// Set when the record resembles an existing one closely enough to flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flagged: Option<DuplicateVerdict>,
}

/// Screen a new record and store it.
///
/// A `Skip` verdict rejects the record before anything is written. A
/// `Merge` verdict admits it and leaves a `duplicate_flagged` event.
///
/// # Errors
///
/// Returns [`Error::Duplicate`] for a near-certain duplicate and
/// [`Error::Validation`] for an invalid payload.
pub fn admit(
    storage: &mut SqliteStorage,
    detector: &DuplicateDetector,
    record: &Record,
    actor: &str,
) -> Result<Admission> {
    validate_invoice(&record.payload)?;

    let existing = storage.list_active()?;
    let verdict = detector.detect(record, &existing);

    if let Some(v) = &verdict {
        if v.action == DuplicateAction::Skip {
            return Err(Error::Duplicate {
                existing_id: v.existing_id.clone(),
                score: v.score,
            });
        }
    }

    let stored = storage.put(record, actor)?;
    if let Some(v) = &verdict {
        tracing::warn!(
            record_id = %stored.id,
            existing_id = %v.existing_id,
            score = v.score,
            "Admitted possible duplicate"
        );
        storage.flag_duplicate(&stored.id, &v.existing_id, v.score, actor)?;
    }

    Ok(Admission {
        record: stored,
        flagged: verdict,
    })
}

fn normalize_number(number: &str) -> String {
    number
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn number_similarity(a: &InvoicePayload, b: &InvoicePayload) -> f64 {
    if normalize_number(&a.invoice_number) == normalize_number(&b.invoice_number) {
        1.0
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn amount_similarity(a: i64, b: i64) -> f64 {
    let largest = a.unsigned_abs().max(b.unsigned_abs());
    if largest == 0 {
        return 1.0;
    }
    let diff = a.abs_diff(b) as f64;
    (1.0 - diff / largest as f64).clamp(0.0, 1.0)
}

fn client_similarity(a: &InvoicePayload, b: &InvoicePayload) -> f64 {
    let left = normalize_text(&format!("{} {}", a.client.name, a.client.address));
    let right = normalize_text(&format!("{} {}", b.client.name, b.client.address));
    similarity_ratio(&left, &right)
}

#[allow(clippy::cast_precision_loss)]
fn time_similarity(a_ms: i64, b_ms: i64, half_life_secs: f64) -> f64 {
    let dt_secs = a_ms.abs_diff(b_ms) as f64 / 1000.0;
    if half_life_secs <= 0.0 {
        return if dt_secs == 0.0 { 1.0 } else { 0.0 };
    }
    0.5_f64.powf(dt_secs / half_life_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientData, LineItem};

    const EPS: f64 = 1e-9;

    fn invoice(id: &str, number: &str, client: &str, price: i64, created_at: i64) -> Record {
        let mut record = Record::new(InvoicePayload::new(
            number,
            "2025-01-20",
            ClientData {
                name: client.into(),
                address: "12 Harbour Street".into(),
            },
            vec![LineItem::new(1, "Consulting", 1, price)],
        ));
        record.id = id.into();
        record.created_at = created_at;
        record
    }

    #[test]
    fn test_identical_records_score_one_and_skip() {
        let detector = DuplicateDetector::default();
        let a = invoice("a", "INV-1", "Acme", 1_000, 0);
        let b = invoice("b", "INV-1", "Acme", 1_000, 0);

        let score = detector.score(&a, &b);
        assert!((score - 1.0).abs() < EPS);
        assert_eq!(detector.classify(score), Some(DuplicateAction::Skip));
    }

    #[test]
    fn test_near_identical_seconds_apart_is_merge() {
        let detector = DuplicateDetector::default();
        let a = invoice("a", "INV-1", "Acme", 1_000, 0);
        let b = invoice("b", "INV-1", "Acme", 1_000, 5_000);

        // 0.80 + 0.20 * 0.5^(5/10)
        let score = detector.score(&a, &b);
        assert!((score - 0.941_421_356).abs() < 1e-6);
        assert_eq!(detector.classify(score), Some(DuplicateAction::Merge));
    }

    #[test]
    fn test_score_is_symmetric_and_bounded() {
        let detector = DuplicateDetector::default();
        let a = invoice("a", "INV-1", "Acme", 1_000, 0);
        let b = invoice("b", "inv 1", "ACME  Corp", 800, 60_000);

        let ab = detector.score(&a, &b);
        let ba = detector.score(&b, &a);
        assert!((ab - ba).abs() < EPS);
        assert!((0.0..=1.0).contains(&ab));
    }

    #[test]
    fn test_unrelated_records_are_not_duplicates() {
        let detector = DuplicateDetector::default();
        let a = invoice("a", "INV-1", "Acme", 1_000, 0);
        let b = invoice("b", "INV-999", "Zenith Ltd", 90, 3_600_000);
        assert_eq!(detector.detect(&a, &[b]), None);
    }

    #[test]
    fn test_detect_ignores_self_and_breaks_ties_by_id() {
        let detector = DuplicateDetector::default();
        let candidate = invoice("c", "INV-1", "Acme", 1_000, 0);
        let twin_z = invoice("z", "INV-1", "Acme", 1_000, 0);
        let twin_b = invoice("b", "INV-1", "Acme", 1_000, 0);

        let verdict = detector
            .detect(&candidate, &[candidate.clone(), twin_z, twin_b])
            .unwrap();
        assert_eq!(verdict.existing_id, "b");
        assert_eq!(verdict.action, DuplicateAction::Skip);
    }

    #[test]
    fn test_component_similarities() {
        assert!((amount_similarity(0, 0) - 1.0).abs() < EPS);
        assert!((amount_similarity(100, 50) - 0.5).abs() < EPS);
        assert!(amount_similarity(100, -100).abs() < EPS);
        assert!((time_similarity(0, 10_000, 10.0) - 0.5).abs() < EPS);
        assert!((time_similarity(0, 0, 0.0) - 1.0).abs() < EPS);
        assert_eq!(normalize_number(" inv-20250120 "), "inv20250120");
    }

    #[test]
    fn test_admit_rejects_skip_and_flags_merge() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let detector = DuplicateDetector::default();
        let now = chrono::Utc::now().timestamp_millis();

        let first = invoice("first", "INV-1", "Acme", 1_000, now);
        let admitted = admit(&mut storage, &detector, &first, "test").unwrap();
        assert!(admitted.flagged.is_none());

        let twin = invoice("twin", "INV-1", "Acme", 1_000, now);
        let err = admit(&mut storage, &detector, &twin, "test").unwrap_err();
        assert!(matches!(err, Error::Duplicate { ref existing_id, .. } if existing_id == "first"));
        assert!(storage.get("twin").unwrap().is_none());

        let later = invoice("later", "INV-1", "Acme", 1_000, now + 5_000);
        let admitted = admit(&mut storage, &detector, &later, "test").unwrap();
        let flag = admitted.flagged.unwrap();
        assert_eq!(flag.action, DuplicateAction::Merge);
        assert_eq!(flag.existing_id, "first");

        let events = storage.events_for("later", None).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == crate::storage::EventType::DuplicateFlagged));
    }
}
