use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use colored::*;
use ebook2pdf::deps::BUILT_IN;
use ebook2pdf::{ConvertError, ConvertOptions, Dependencies, Direction, Mode, PageLayout, PaperSize, PdfOptions, TextOptions};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ebook2pdf")]
#[command(about = "CLI utility to convert DRM-free EPUB, MOBI and AZW books into PDF files")]
#[command(version)]
struct Args {
    /// E-book to convert (.epub, .mobi, .prc, .azw, .azw3)
    #[arg(required_unless_present = "check_deps")]
    input: Option<PathBuf>,

    /// Output PDF path (defaults to the input path with a .pdf extension)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Conversion mode
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = Mode::PreserveFormatting)]
    mode: Mode,

    /// Log every section as it is processed
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Check external dependencies and exit
    #[arg(long = "check-deps")]
    check_deps: bool,

    /// Chromium or Chrome executable used by preserve-formatting mode
    #[arg(long = "chrome", env = "CHROME_PATH")]
    chrome: Option<PathBuf>,

    /// Launch Chromium without its sandbox (needed in some containers)
    #[arg(long = "no-sandbox")]
    no_sandbox: bool,

    /// Paper size for preserve-formatting and plain-text modes
    #[arg(long = "paper", value_enum, default_value_t = PaperSize::A4)]
    paper: PaperSize,

    /// Page margin in inches
    #[arg(long = "margin", default_value = "0.5", value_parser = parse_margin)]
    margin: f64,

    /// Print scale for preserve-formatting mode
    #[arg(long = "scale", default_value = "1.0", value_parser = parse_scale)]
    scale: f64,

    /// Body font size in points for plain-text mode
    #[arg(long = "font-size", default_value = "11")]
    font_size: f32,

    /// Page layout of fixed-layout output
    #[arg(short = 'l', long = "layout", value_enum)]
    layout: Option<PageLayout>,

    /// Reading direction of fixed-layout output
    #[arg(short = 'd', long = "direction", value_enum)]
    direction: Option<Direction>,
}

fn parse_margin(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if value < 0.0 {
        return Err("Must be zero or positive number.".to_string());
    }
    Ok(value)
}

fn parse_scale(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if !(0.1..=2.0).contains(&value) {
        return Err("Must be between 0.1 and 2.0.".to_string());
    }
    Ok(value)
}

impl Args {
    fn options(&self) -> ConvertOptions {
        let mut options = ConvertOptions::new(self.mode);
        options.output = self.output.clone();
        options.pdf = PdfOptions {
            paper: self.paper,
            scale: self.scale,
            no_sandbox: self.no_sandbox,
            ..Default::default()
        }
        .with_margin(self.margin);
        options.text = TextOptions {
            paper: self.paper,
            margin: self.margin,
            font_size: self.font_size,
        };
        options.layout = self.layout.unwrap_or_default();
        options.direction = self.direction.unwrap_or_default();
        options
    }
}

/// Prints every dependency; returns whether all of them were found.
fn check_deps(deps: &Dependencies) -> bool {
    println!("{}", "External tools:".bold());
    for status in deps.statuses() {
        let mark = if status.location.is_some() { "✓".green() } else { "✗".red() };
        println!("  {} {}", mark, status);
    }

    println!("{}", "Built in:".bold());
    for (name, purpose) in BUILT_IN {
        println!("  {} {}: {}", "✓".green(), name, purpose);
    }

    let missing = deps.missing();
    if missing.is_empty() {
        println!("{}", "All dependencies found.".green());
        true
    } else {
        let names: Vec<&str> = missing.iter().map(|status| status.name).collect();
        println!("{}", format!("Missing dependencies: {}", names.join(", ")).red());
        false
    }
}

async fn run(input: PathBuf, options: ConvertOptions, deps: Dependencies) -> Result<()> {
    let report = ebook2pdf::convert(&input, &options, &deps)
        .await
        .with_context(|| format!("Failed to convert {}", input.display()))?;

    info!("{}", "Conversion complete".green());
    println!("{}", report);
    Ok(())
}

/// `RUST_LOG` (or `ebook2pdf=info`) with chromiumoxide protocol noise
/// suppressed; `--verbose` raises this crate to debug on top of either.
fn log_filter(verbose: bool) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ebook2pdf=info"));
    let mut directives = vec!["chromiumoxide::conn=off", "chromiumoxide::handler=off"];
    if verbose {
        directives.push("ebook2pdf=debug");
    }
    for directive in directives {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter(args.verbose))
        .init();

    if args.mode != Mode::FixedLayout && (args.layout.is_some() || args.direction.is_some()) {
        Args::command()
            .error(
                ErrorKind::ArgumentConflict,
                format!("--layout and --direction only apply to --mode {}", Mode::FixedLayout),
            )
            .exit();
    }

    let deps = Dependencies::probe(args.chrome.as_deref());

    if args.check_deps {
        let all_found = check_deps(&deps);
        process::exit(if all_found { 0 } else { 1 });
    }

    let options = args.options();
    let Some(input) = args.input else {
        // clap enforces INPUT unless --check-deps is given
        process::exit(2);
    };

    if let Err(e) = run(input, options, deps).await {
        error!("{}", format!("Error: {:#}", e).red());
        if let Some(suggestion) = e.downcast_ref::<ConvertError>().and_then(ConvertError::suggestion) {
            error!("{}", suggestion.yellow());
        }
        process::exit(1);
    }
}
