//! xbrl-facts CLI - Repair SEC filings and extract reporting-period facts

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use xbrl_facts::{
    extract_custom, extract_dei, extract_filing, extract_gaap, parse_date, repair_with_report,
    resolve_contexts, Document, ErrorMode, ExtractOptions, FactResolver, Parser, PeriodSpec,
    TagPatterns, TracingSink, ValueKind,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Repair SEC XBRL filings and extract reporting-period facts
#[derive(ClapParser)]
#[command(name = "xbrl-facts")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PeriodArgs {
    /// End of the reporting period (YYYY-MM-DD); defaults to today
    #[arg(short, long, value_parser = parse_doc_date)]
    date: Option<chrono::NaiveDate>,

    /// Period: current, year, instant, or a day count (multiple of 90)
    #[arg(short, long, default_value = "current")]
    period: PeriodSpec,
}

impl PeriodArgs {
    fn options(&self, errors: ErrorMode) -> ExtractOptions {
        let options = ExtractOptions::new()
            .with_period(self.period)
            .with_error_mode(errors);
        match self.date {
            Some(date) => options.with_doc_date(date),
            None => options,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Section {
    Gaap,
    Dei,
    Custom,
    All,
}

#[derive(Subcommand)]
enum Commands {
    /// Close unbalanced tags and write the repaired text
    Repair {
        /// Input file
        input: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the contexts that match a reporting period
    Contexts {
        /// Input file
        input: PathBuf,

        #[command(flatten)]
        period: PeriodArgs,
    },

    /// Resolve a single fact
    Fact {
        /// Input file
        input: PathBuf,

        /// Tag name patterns, tried in order
        #[arg(required = true)]
        patterns: Vec<String>,

        #[command(flatten)]
        period: PeriodArgs,

        /// Return the raw text of the first match
        #[arg(long)]
        string: bool,

        /// Skip context filtering
        #[arg(long)]
        no_context: bool,

        /// Error handling: raise, ignore, log
        #[arg(short, long, default_value = "raise")]
        errors: ErrorMode,
    },

    /// Extract facts as JSON
    Extract {
        /// Input file
        input: PathBuf,

        #[command(flatten)]
        period: PeriodArgs,

        /// Error handling: raise, ignore, log
        #[arg(short, long, default_value = "raise")]
        errors: ErrorMode,

        #[arg(short, long, value_enum, default_value = "all")]
        section: Section,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Benchmark repair, parse and extraction
    Bench {
        /// Input file
        input: PathBuf,

        /// Number of iterations
        #[arg(short, long, default_value = "100")]
        iterations: usize,
    },
}

fn parse_doc_date(s: &str) -> std::result::Result<chrono::NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("'{}' is not a YYYYMMDD date", s))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default.into())
                .from_env_lossy(),
        )
        .init();
}

fn load(input: &Path) -> Result<Document> {
    Parser::new()
        .parse_file(input)
        .with_context(|| format!("Failed to parse {}", input.display()))
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Repair { input, output } => {
            let raw = std::fs::read(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let report = repair_with_report(&String::from_utf8_lossy(&raw));

            match &output {
                Some(path) => std::fs::write(path, &report.text)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => print!("{}", report.text),
            }

            eprintln!("{} {}", "✓".green().bold(), input.display());
            eprintln!("  Closed tags: {}", report.synthesized);
            if let Some(tag) = report.left_open {
                eprintln!("  {} <{}> left open at end of input", "WARN:".yellow(), tag);
            }
        }

        Commands::Contexts { input, period } => {
            let doc = load(&input)?;
            let options = period.options(ErrorMode::Raise);
            let contexts = resolve_contexts(&doc, options.target_date(), options.period)?;

            println!(
                "{} {} ({} ending {})",
                "✓".green().bold(),
                input.display(),
                options.period,
                options.target_date()
            );
            for id in contexts.sorted() {
                println!("  {}", id);
            }
            if contexts.is_empty() {
                println!("  {}", "no matching context".yellow());
            }
        }

        Commands::Fact {
            input,
            patterns,
            period,
            string,
            no_context,
            errors,
        } => {
            let doc = load(&input)?;
            let options = period.options(errors);
            let contexts = resolve_contexts(&doc, options.target_date(), options.period)?;
            let tags = TagPatterns::any(patterns.as_slice())?;
            let kind = if string {
                ValueKind::String
            } else {
                ValueKind::Number
            };

            let value = FactResolver::new(&doc, &contexts)
                .with_error_mode(errors)
                .with_sink(&TracingSink)
                .resolve(&tags, kind, no_context)
                .with_context(|| format!("Failed to resolve {}", tags))?;
            println!("{}", value);
        }

        Commands::Extract {
            input,
            period,
            errors,
            section,
            pretty,
        } => {
            let doc = load(&input)?;
            let options = period.options(errors);
            match section {
                Section::Gaap => print_json(&extract_gaap(&doc, &options, &TracingSink)?, pretty)?,
                Section::Dei => print_json(&extract_dei(&doc, errors, &TracingSink)?, pretty)?,
                Section::Custom => print_json(&extract_custom(&doc), pretty)?,
                Section::All => print_json(&extract_filing(&doc, &options, &TracingSink)?, pretty)?,
            }
        }

        Commands::Bench { input, iterations } => {
            let iterations = iterations.max(1);
            let parser = Parser::new();
            let options = ExtractOptions::new().with_error_mode(ErrorMode::Ignore);

            // Warmup
            for _ in 0..3 {
                let _ = parser.parse_file(&input)?;
            }

            let mut times = Vec::with_capacity(iterations);
            let mut elements = 0;

            for _ in 0..iterations {
                let start = Instant::now();
                let doc = parser.parse_file(&input)?;
                extract_filing(&doc, &options, &TracingSink)?;
                times.push(start.elapsed());
                elements = doc.len();
            }

            times.sort();
            let min = times[0];
            let max = times[times.len() - 1];
            let median = times[times.len() / 2];
            let mean = times.iter().sum::<std::time::Duration>() / times.len() as u32;

            println!("Benchmark Results for {}", input.display());
            println!("  Iterations: {}", iterations);
            println!("  Elements: {}", elements);
            println!("  Min:    {:.3}ms", min.as_secs_f64() * 1000.0);
            println!("  Median: {:.3}ms", median.as_secs_f64() * 1000.0);
            println!("  Mean:   {:.3}ms", mean.as_secs_f64() * 1000.0);
            println!("  Max:    {:.3}ms", max.as_secs_f64() * 1000.0);
            println!(
                "  Throughput: {:.0} elements/sec",
                elements as f64 / mean.as_secs_f64()
            );
        }
    }

    Ok(())
}
