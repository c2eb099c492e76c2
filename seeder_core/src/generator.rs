//! Synthetic receivable generator.
use std::{
    ops::RangeInclusive,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use snafu::ensure;

use crate::{
    dates::DateWindow,
    distribution::Category,
    error::{ConfigurationSnafu, Result},
    receivable::Receivable,
};

const FACE_VALUE: RangeInclusive<u32> = 100..=1000;
const PRODUCT_CODE: RangeInclusive<u32> = 100..=599;
const PARTNER_PRODUCT_CODE: RangeInclusive<u32> = 1..=100;
const MODALITY: RangeInclusive<u32> = 1..=5;

/// How each record's private random source is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    /// Wall-clock nanoseconds mixed with the record index.
    Clock,
    /// A fixed base mixed with the record index, for reproducible runs.
    Fixed(u64),
}

/// Generates receivables for a run.
///
/// The generator is immutable and cheap to clone; each call to
/// [`RecordGenerator::generate`] allocates its own random source, so calls
/// from concurrent tasks neither contend nor produce correlated sequences.
#[derive(Debug, Clone)]
pub struct RecordGenerator {
    customers: Arc<[String]>,
    dates: DateWindow,
    seed: SeedSource,
}

impl RecordGenerator {
    /// Creates a generator drawing customers from `customers`.
    ///
    /// Fails if the customer universe is empty.
    pub fn new(customers: Vec<String>) -> Result<Self> {
        ensure!(
            !customers.is_empty(),
            ConfigurationSnafu {
                message: "customer universe is empty",
            }
        );

        Ok(Self {
            customers: customers.into(),
            dates: DateWindow::default(),
            seed: SeedSource::Clock,
        })
    }

    /// Change the window due dates and adjustment dates are drawn from.
    pub fn with_date_window(mut self, dates: DateWindow) -> Self {
        self.dates = dates;
        self
    }

    /// Change how random sources are seeded.
    pub fn with_seed(mut self, seed: SeedSource) -> Self {
        self.seed = seed;
        self
    }

    pub fn customers(&self) -> &[String] {
        &self.customers
    }

    pub fn date_window(&self) -> &DateWindow {
        &self.dates
    }

    /// Generates the record at `index` of a run of `total` records.
    pub fn generate(&self, index: u64, total: u64) -> Receivable {
        let mut rng = self.rng_for(index);
        self.generate_with(index, total, &mut rng)
    }

    /// Generates a record using the given random source.
    pub fn generate_with<R: Rng + ?Sized>(&self, index: u64, total: u64, rng: &mut R) -> Receivable {
        let customer = &self.customers[rng.random_range(0..self.customers.len())];
        let face_value = rng.random_range(FACE_VALUE) as f64;
        let due_date = self.dates.sample(rng);

        let mut receivable = Receivable {
            id: uuid::Uuid::new_v4().to_string(),
            customer_code: customer.clone(),
            product_code: rng.random_range(PRODUCT_CODE),
            partner_product_code: rng.random_range(PARTNER_PRODUCT_CODE),
            modality: rng.random_range(MODALITY),
            face_value,
            due_date,
            cancellations: Vec::new(),
            negotiations: Vec::new(),
        };

        let adjustments =
            Category::classify(index, total).synthesize(face_value, &self.dates, rng);
        receivable.set_adjustments(adjustments);

        receivable
    }

    fn rng_for(&self, index: u64) -> StdRng {
        let base = match self.seed {
            SeedSource::Fixed(base) => base,
            SeedSource::Clock => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default(),
        };

        StdRng::seed_from_u64(base.wrapping_add(index))
    }
}

/// Builds customer codes `CLI-<n>` for every `n` in the range.
pub fn customer_range(range: RangeInclusive<u64>) -> Vec<String> {
    range.map(|n| format!("CLI-{n}")).collect()
}

/// The customers used when none are configured: `CLI-10001` to `CLI-10020`.
pub fn default_customers() -> Vec<String> {
    customer_range(10001..=10020)
}
