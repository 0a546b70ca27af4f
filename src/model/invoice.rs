//! Invoice payload model.
//!
//! The payload is the business content of a record: everything that is
//! checksummed, compared during conflict resolution and sent to the remote.
//! Sync metadata (status, version, timestamps) lives on [`super::Record`].

use serde::{Deserialize, Serialize};

/// Format used for `invoice_date`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Date format embedded in generated invoice numbers (`INV-20250120`).
pub const INVOICE_NUMBER_DATE_FORMAT: &str = "%Y%m%d";

/// Quantity a fresh line item starts with.
pub const DEFAULT_QUANTITY: i64 = 1;

/// Party the invoice is addressed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientData {
    pub name: String,
    #[serde(default)]
    pub address: String,
}

/// A single invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Stable identity used to reconcile lines across replicas.
    ///
    /// `number` is display order and gets renumbered; `key` never changes.
    pub key: String,

    /// 1-based display position
    pub number: u32,

    pub description: String,

    /// Quantity
    pub amount: i64,

    /// Unit price in the smallest currency unit
    pub price: i64,
}

impl LineItem {
    /// Create a line item with a fresh stable key.
    #[must_use]
    pub fn new(number: u32, description: impl Into<String>, amount: i64, price: i64) -> Self {
        Self {
            key: uuid::Uuid::new_v4().to_string(),
            number,
            description: description.into(),
            amount,
            price,
        }
    }

    /// `amount * price`, saturating instead of overflowing.
    #[must_use]
    pub fn subtotal(&self) -> i64 {
        self.amount.saturating_mul(self.price)
    }
}

/// The payload fields of an invoice record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayload {
    pub invoice_number: String,

    /// Issue date, `YYYY-MM-DD`
    pub invoice_date: String,

    pub client: ClientData,

    pub line_items: Vec<LineItem>,

    /// Sum of line subtotals, kept in sync by [`InvoicePayload::recompute_total`]
    pub total_amount: i64,
}

impl InvoicePayload {
    /// Build a payload and compute its total.
    #[must_use]
    pub fn new(
        invoice_number: impl Into<String>,
        invoice_date: impl Into<String>,
        client: ClientData,
        line_items: Vec<LineItem>,
    ) -> Self {
        let mut payload = Self {
            invoice_number: invoice_number.into(),
            invoice_date: invoice_date.into(),
            client,
            line_items,
            total_amount: 0,
        };
        payload.recompute_total();
        payload
    }

    /// A blank invoice dated today with one empty line item.
    #[must_use]
    pub fn draft(prefix: &str) -> Self {
        let today = chrono::Local::now();
        Self::new(
            generate_invoice_number(prefix, today.date_naive()),
            today.format(DATE_FORMAT).to_string(),
            ClientData::default(),
            vec![LineItem::new(1, "", DEFAULT_QUANTITY, 0)],
        )
    }

    /// Sum of all line subtotals.
    #[must_use]
    pub fn computed_total(&self) -> i64 {
        self.line_items
            .iter()
            .fold(0_i64, |acc, item| acc.saturating_add(item.subtotal()))
    }

    /// Reset `total_amount` from the line items.
    pub fn recompute_total(&mut self) {
        self.total_amount = self.computed_total();
    }

    /// Append a line item at the end, numbering it after the current last line.
    pub fn add_line_item(&mut self, description: impl Into<String>, amount: i64, price: i64) {
        let number = u32::try_from(self.line_items.len() + 1).unwrap_or(u32::MAX);
        self.line_items
            .push(LineItem::new(number, description, amount, price));
        self.recompute_total();
    }

    /// Remove the line at `index`.
    ///
    /// The last remaining line can't be removed. Returns whether a line was removed.
    pub fn remove_line_item(&mut self, index: usize) -> bool {
        if index < self.line_items.len() && self.line_items.len() > 1 {
            self.line_items.remove(index);
            self.renumber_items();
            self.recompute_total();
            true
        } else {
            false
        }
    }

    /// Renumber lines sequentially from 1 in their current order.
    pub fn renumber_items(&mut self) {
        for (i, item) in self.line_items.iter_mut().enumerate() {
            item.number = u32::try_from(i + 1).unwrap_or(u32::MAX);
        }
    }
}

/// Generate an invoice number like `INV-20250120`.
#[must_use]
pub fn generate_invoice_number(prefix: &str, date: chrono::NaiveDate) -> String {
    format!("{prefix}-{}", date.format(INVOICE_NUMBER_DATE_FORMAT))
}
