//! Business rules deciding which adjustments a receivable gets.
//!
//! The category only depends on the record position within the run, so that
//! any run of `N` records has the same category boundaries. The adjustment
//! amounts are random, drawn from the caller's random source.
use rand::Rng;

use crate::{
    dates::DateWindow,
    receivable::{
        Adjustments, CANCELLATION_REASONS, Cancellation, Negotiation, from_cents, share_of_cents,
    },
};

/// Upper bounds (exclusive, in percent) of each category band, in order.
const BANDS: [(u128, Category); 4] = [
    (5, Category::FullCancellation),
    (20, Category::PartialCancellation),
    (25, Category::FullNegotiation),
    (45, Category::PartialNegotiation),
];

const MAX_ADJUSTMENTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    FullCancellation,
    PartialCancellation,
    FullNegotiation,
    PartialNegotiation,
    None,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::FullCancellation,
        Category::PartialCancellation,
        Category::FullNegotiation,
        Category::PartialNegotiation,
        Category::None,
    ];

    /// Classifies the record at `index` in a run of `total` records.
    ///
    /// The percentile `index / total * 100` is compared with integer
    /// arithmetic, so band boundaries are exact: with `total = 20`, index 4
    /// sits at 20% and falls in the `[20, 25)` band.
    pub fn classify(index: u64, total: u64) -> Self {
        if total == 0 {
            return Category::None;
        }

        let scaled = index as u128 * 100;
        let total = total as u128;

        BANDS
            .iter()
            .find(|(bound, _)| scaled < bound * total)
            .map(|(_, category)| *category)
            .unwrap_or(Category::None)
    }

    /// Whether the adjustments cover the whole face value.
    pub fn is_full(&self) -> bool {
        matches!(
            self,
            Category::FullCancellation | Category::FullNegotiation
        )
    }

    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            Category::PartialCancellation | Category::PartialNegotiation
        )
    }

    /// Synthesizes the adjustments for a receivable with the given face value.
    ///
    /// Amounts are truncated at the cent and the last entry absorbs whatever is
    /// left, so full categories sum to the face value exactly and partial ones
    /// to the drawn total.
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        face_value: f64,
        dates: &DateWindow,
        rng: &mut R,
    ) -> Adjustments {
        let face_cents = (face_value * 100.0) as i64;

        match self {
            Category::None => Adjustments::None,
            Category::FullCancellation => {
                Adjustments::Cancellations(cancellations(face_cents, dates, rng))
            }
            Category::PartialCancellation => {
                let total = partial_total(face_cents, rng);
                Adjustments::Cancellations(cancellations(total, dates, rng))
            }
            Category::FullNegotiation => {
                Adjustments::Negotiations(negotiations(face_cents, dates, rng))
            }
            Category::PartialNegotiation => {
                let total = partial_total(face_cents, rng);
                Adjustments::Negotiations(negotiations(total, dates, rng))
            }
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::FullCancellation => "full-cancellation",
            Category::PartialCancellation => "partial-cancellation",
            Category::FullNegotiation => "full-negotiation",
            Category::PartialNegotiation => "partial-negotiation",
            Category::None => "none",
        };
        write!(f, "{name}")
    }
}

/// Draws a total between 10% and 70% of the face value, in cents.
fn partial_total<R: Rng + ?Sized>(face_cents: i64, rng: &mut R) -> i64 {
    let share = rng.random_range(0.1..0.7);
    let total = share_of_cents(face_cents, share);
    // Truncation may push the total a cent below 10%.
    let min = (face_cents + 9) / 10;
    let max = face_cents * 7 / 10;
    total.clamp(min, max)
}

/// Splits `total_cents` into 1 to 3 parts.
///
/// Every part but the last takes 20% to 60% of what is still unallocated.
fn split<R: Rng + ?Sized>(total_cents: i64, rng: &mut R) -> Vec<i64> {
    let count = rng.random_range(1..=MAX_ADJUSTMENTS);
    let mut remaining = total_cents;
    let mut parts = Vec::with_capacity(count);

    for _ in 1..count {
        let share = rng.random_range(0.2..0.6);
        let part = share_of_cents(remaining, share);
        remaining -= part;
        parts.push(part);
    }
    parts.push(remaining);

    parts
}

fn cancellations<R: Rng + ?Sized>(
    total_cents: i64,
    dates: &DateWindow,
    rng: &mut R,
) -> Vec<Cancellation> {
    split(total_cents, rng)
        .into_iter()
        .map(|cents| Cancellation {
            id: uuid::Uuid::new_v4().to_string(),
            date: dates.sample(rng),
            amount: from_cents(cents),
            reason: CANCELLATION_REASONS[rng.random_range(0..CANCELLATION_REASONS.len())]
                .to_string(),
        })
        .collect()
}

fn negotiations<R: Rng + ?Sized>(
    total_cents: i64,
    dates: &DateWindow,
    rng: &mut R,
) -> Vec<Negotiation> {
    split(total_cents, rng)
        .into_iter()
        .map(|cents| Negotiation {
            id: uuid::Uuid::new_v4().to_string(),
            date: dates.sample(rng),
            amount: from_cents(cents),
        })
        .collect()
}
