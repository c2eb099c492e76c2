use chrono::NaiveDate;
use clap::Args;
use seeder_core::{
    RecordGenerator, SeedSource, customer_range, dates::DateWindow, default_customers,
};
use snafu::ResultExt;

use crate::{
    error::{InvalidArgumentSnafu, InvalidRangeSnafu, Result, SeedSnafu},
    helpers::parse_range,
};

/// Arguments shared by every command that generates records.
#[derive(Args, Debug, Clone)]
pub struct GeneratorArgs {
    /// Customer codes records are assigned to.
    ///
    /// Repeat the flag or pass a comma separated list.
    #[arg(long, value_delimiter = ',', conflicts_with = "customer_range")]
    pub customers: Vec<String>,
    /// Customer numbers, as a single number (e.g. 10001) or a range
    /// (e.g. 10001-10020), expanded to `CLI-<n>` codes.
    ///
    /// Defaults to CLI-10001 to CLI-10020.
    #[arg(long)]
    pub customer_range: Option<String>,
    /// Seed for reproducible records. Records are seeded from the clock when
    /// missing.
    #[arg(long)]
    pub seed: Option<u64>,
    /// First date (inclusive) due dates and adjustment dates are drawn from.
    #[arg(long, requires = "date_end")]
    pub date_start: Option<NaiveDate>,
    /// Last date (exclusive) due dates and adjustment dates are drawn from.
    #[arg(long, requires = "date_start")]
    pub date_end: Option<NaiveDate>,
}

impl GeneratorArgs {
    pub fn customers(&self) -> Result<Vec<String>> {
        if let Some(range) = &self.customer_range {
            let range = parse_range(range).context(InvalidRangeSnafu {})?;
            return Ok(customer_range(range));
        }

        if self.customers.is_empty() {
            return Ok(default_customers());
        }

        let customers: Vec<_> = self
            .customers
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        snafu::ensure!(
            !customers.is_empty(),
            InvalidArgumentSnafu {
                name: "customers",
                message: "no customer code given",
            }
        );

        Ok(customers)
    }

    pub fn generator(&self) -> Result<RecordGenerator> {
        let mut generator = RecordGenerator::new(self.customers()?).context(SeedSnafu {})?;

        if let (Some(start), Some(end)) = (self.date_start, self.date_end) {
            let window = DateWindow::new(start, end).context(SeedSnafu {})?;
            generator = generator.with_date_window(window);
        }

        if let Some(seed) = self.seed {
            generator = generator.with_seed(SeedSource::Fixed(seed));
        }

        Ok(generator)
    }
}
