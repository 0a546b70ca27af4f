//! Input validation and name normalization.
//!
//! - Invoice payload validation: every problem is collected and returned
//!   together, so a rejected payload can be fixed in one pass.
//! - Strategy and status names: exact match → synonym lookup → error with a
//!   Levenshtein-based suggestion.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::model::{InvoicePayload, LineItem, SyncStatus};

// ── Payload limits ───────────────────────────────────────────

pub const MIN_QUANTITY: i64 = 1;
pub const MAX_QUANTITY: i64 = 999;
pub const MAX_PRICE: i64 = 999_999_999;

// ── Valid value sets (O(1) lookups) ──────────────────────────

pub static VALID_STRATEGIES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    ["last_write_wins", "field_merge", "manual"]
        .into_iter()
        .collect()
});

pub static VALID_STATUSES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    SyncStatus::ALL.iter().map(SyncStatus::as_str).collect()
});

// ── Synonym maps ─────────────────────────────────────────────

pub static STRATEGY_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("lww", "last_write_wins"),
        ("last-write-wins", "last_write_wins"),
        ("latest", "last_write_wins"),
        ("newest", "last_write_wins"),
        ("merge", "field_merge"),
        ("field-merge", "field_merge"),
        ("fields", "field_merge"),
        ("defer", "manual"),
        ("ask", "manual"),
    ]
    .into_iter()
    .collect()
});

pub static STATUS_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("QUEUED", "PENDING"),
        ("WAITING", "PENDING"),
        ("IN_FLIGHT", "SYNCING"),
        ("RUNNING", "SYNCING"),
        ("DONE", "SYNCED"),
        ("OK", "SYNCED"),
        ("CONFLICTED", "CONFLICT"),
        ("FAILED", "ERROR"),
        ("ERRORED", "ERROR"),
    ]
    .into_iter()
    .collect()
});

/// Normalize a resolution strategy name.
///
/// Accepts canonical names (`last_write_wins`), dashed spellings and
/// shorthands (`lww`, `merge`). Returns the canonical name, or the original
/// input and an optional suggestion.
pub fn normalize_strategy(input: &str) -> std::result::Result<String, (String, Option<String>)> {
    let lower = input.trim().to_lowercase();

    // Tier 1: exact match
    if VALID_STRATEGIES.contains(lower.as_str()) {
        return Ok(lower);
    }

    // Tier 2: synonym lookup
    if let Some(&canonical) = STRATEGY_SYNONYMS.get(lower.as_str()) {
        return Ok(canonical.to_string());
    }

    // Tier 3: find closest suggestion
    let suggestion = find_closest_match(&lower, &VALID_STRATEGIES, &STRATEGY_SYNONYMS);
    Err((input.to_string(), suggestion))
}

/// Normalize a sync status filter (`pending`, `failed`, `done`, ...).
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] naming the closest valid status.
pub fn normalize_sync_status(input: &str) -> Result<SyncStatus> {
    let upper = input.trim().to_uppercase();

    let canonical = if VALID_STATUSES.contains(upper.as_str()) {
        upper
    } else if let Some(&canonical) = STATUS_SYNONYMS.get(upper.as_str()) {
        canonical.to_string()
    } else {
        let message = match find_closest_match(&upper, &VALID_STATUSES, &STATUS_SYNONYMS) {
            Some(s) => format!("invalid status '{input}' (did you mean {s}?)"),
            None => format!("invalid status '{input}'"),
        };
        return Err(Error::InvalidArgument(message));
    };

    canonical.parse().map_err(Error::InvalidArgument)
}

/// Find the closest matching value across valid set and synonyms.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;

    for &v in valid.iter().chain(synonyms.keys()) {
        let dist = levenshtein_distance(input, v);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            // For synonyms, show what it maps to
            best = Some((synonyms.get(v).copied().unwrap_or(v), dist));
        }
    }

    best.map(|(v, _)| v.to_string())
}

// ── Invoice validation ───────────────────────────────────────

/// Validate a single line item, returning one message per problem.
#[must_use]
pub fn validate_line_item(item: &LineItem) -> Vec<String> {
    let mut errors = Vec::new();

    if item.description.trim().is_empty() {
        errors.push("Description cannot be empty".to_string());
    }
    if item.amount < MIN_QUANTITY {
        errors.push(format!("Amount must be at least {MIN_QUANTITY}"));
    }
    if item.amount > MAX_QUANTITY {
        errors.push(format!("Amount cannot exceed {MAX_QUANTITY}"));
    }
    if item.price < 0 {
        errors.push("Price cannot be negative".to_string());
    }
    if item.price > MAX_PRICE {
        errors.push(format!("Price cannot exceed {MAX_PRICE}"));
    }
    if item.key.trim().is_empty() {
        errors.push("Line key cannot be empty".to_string());
    }

    errors
}

/// Validate an invoice payload, returning every problem found.
#[must_use]
pub fn invoice_errors(payload: &InvoicePayload) -> Vec<String> {
    let mut errors = Vec::new();

    if payload.invoice_number.trim().is_empty() {
        errors.push("Invoice number cannot be empty".to_string());
    }
    if payload.client.name.trim().is_empty() {
        errors.push("Customer name cannot be empty".to_string());
    }
    if chrono::NaiveDate::parse_from_str(&payload.invoice_date, crate::model::invoice::DATE_FORMAT)
        .is_err()
    {
        errors.push(format!(
            "Invoice date '{}' is not a YYYY-MM-DD date",
            payload.invoice_date
        ));
    }
    if payload.line_items.is_empty() {
        errors.push("Invoice must have at least one line item".to_string());
    }

    let mut seen_keys = HashSet::new();
    for (i, item) in payload.line_items.iter().enumerate() {
        for error in validate_line_item(item) {
            errors.push(format!("Line {}: {error}", i + 1));
        }
        if !seen_keys.insert(item.key.as_str()) {
            errors.push(format!("Line {}: duplicate line key '{}'", i + 1, item.key));
        }
    }

    let computed = payload.computed_total();
    if payload.total_amount != computed {
        errors.push(format!(
            "Total amount {} does not match line items ({computed})",
            payload.total_amount
        ));
    }

    errors
}

/// Validate an invoice payload before it is admitted to the store.
///
/// # Errors
///
/// Returns [`Error::Validation`] carrying every problem found.
pub fn validate_invoice(payload: &InvoicePayload) -> Result<()> {
    let errors = invoice_errors(payload);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let a_len = a.len();
    let b_len = b.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    // Use single-row optimization (O(min(m,n)) space)
    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Edit-distance similarity in [0, 1]; 1.0 means identical.
///
/// Two empty strings are identical.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / longest as f64
}
