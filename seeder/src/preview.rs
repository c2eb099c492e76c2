use std::io::Write;

use clap::Args;
use snafu::ResultExt;

use crate::{
    error::{Result, SerializeSnafu},
    generator_args::GeneratorArgs,
};

/// Print generated records without writing them anywhere.
#[derive(Args, Debug, Clone)]
pub struct PreviewArgs {
    /// How many records to print.
    #[arg(long, default_value = "5")]
    pub count: u64,
    /// Size of the run the records are drawn from, which decides their
    /// adjustment category. Defaults to `count`.
    #[arg(long)]
    pub total: Option<u64>,
    /// Print each record on a single line.
    #[arg(long)]
    pub compact: bool,
    #[clap(flatten)]
    pub generator: GeneratorArgs,
}

impl PreviewArgs {
    pub fn run(self) -> Result<()> {
        let stdout = std::io::stdout();
        self.write(&mut stdout.lock())
    }

    fn write(&self, out: &mut impl Write) -> Result<()> {
        let generator = self.generator.generator()?;
        let total = self.total.unwrap_or(self.count).max(self.count);

        for index in 0..self.count {
            let record = generator.generate(index, total);
            let line = if self.compact {
                serde_json::to_string(&record)
            } else {
                serde_json::to_string_pretty(&record)
            }
            .context(SerializeSnafu {})?;

            // A closed pipe (e.g. `| head`) ends the preview.
            if writeln!(out, "{line}").is_err() {
                break;
            }
        }

        Ok(())
    }
}
