use clap::Parser;
use log::info;

use lattice_rs::backend::{Backend, Enumerator, Iscc, IsccConfig, Unavailable};
use lattice_rs::counter::{ExactCount, HybridCounter};
use lattice_rs::domain::to_domain;
use lattice_rs::expr::{BoundExpr, Params};
use lattice_rs::invert::parameters_for;
use lattice_rs::loops::{LoopBound, LoopStructure};
use lattice_rs::pattern::Pattern;

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Loop nest shape.
    #[arg(short, long, value_name = "PATTERN", default_value = "lower-triangle")]
    pattern: Pattern,

    /// Parameter values, e.g. `n=100 k=3`.
    #[arg(value_name = "NAME=INT", value_parser = parse_param)]
    params: Vec<(String, i64)>,

    /// Size `n` so that the nest has at least this many points (overrides `n`).
    #[arg(long, value_name = "INT")]
    target: Option<i64>,

    /// Count in-process instead of calling iscc.
    #[arg(long)]
    enumerate: bool,

    /// Directory containing the iscc executable.
    #[arg(long, value_name = "DIR")]
    iscc_dir: Vec<std::path::PathBuf>,
}

fn parse_param(s: &str) -> Result<(String, i64), String> {
    let (name, value) = s.split_once('=').ok_or_else(|| format!("expected NAME=INT, got `{}`", s))?;
    let value = value.trim().parse::<i64>().map_err(|e| e.to_string())?;
    Ok((name.trim().to_string(), value))
}

fn expr(src: &str) -> color_eyre::Result<BoundExpr> {
    Ok(src.parse()?)
}

/// The textbook nest for every pattern.
fn nest_of(pattern: Pattern) -> color_eyre::Result<LoopStructure> {
    let (outer, inner) = match pattern {
        Pattern::LowerTriangle => (LoopBound::new("i", 0, "n"), LoopBound::new("j", 0, "i")),
        Pattern::UpperTriangle => (LoopBound::new("i", 0, "n"), LoopBound::new("j", "i", "n")),
        Pattern::Trapezoid => (
            LoopBound::new("t", 0, "n"),
            LoopBound::new("x", expr("max(0, t - k)")?, expr("min(n, t + k + 1)")?),
        ),
        Pattern::Diagonal => (
            LoopBound::new("d", 0, expr("n + m - 1")?),
            LoopBound::new("i", expr("max(0, d - m + 1)")?, expr("min(d + 1, n)")?),
        ),
        Pattern::Parallelogram => (
            LoopBound::new("i", 0, "n"),
            LoopBound::new("j", expr("max(0, i - k)")?, expr("min(n, i + k + 1)")?),
        ),
        Pattern::BandMatrix => (
            LoopBound::new("i", 0, "n"),
            LoopBound::new("j", expr("max(0, i - b)")?, expr("min(n, i + b + 1)")?),
        ),
    };
    Ok(LoopStructure::new(vec![outer, inner], vec![])?)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Cli::parse();
    println!("args = {:?}", args);

    let mut params: Params = args.params.iter().cloned().collect();
    if let Some(target) = args.target {
        params.extend(parameters_for(target, Some(args.pattern))?);
    }
    for name in args.pattern.parameter_names() {
        params.entry(name.to_string()).or_insert(10);
    }
    println!("params = {:?}", params);

    let nest = nest_of(args.pattern)?;
    print!("{}", nest);
    println!("closed form: {}", args.pattern.closed_form());
    println!("symbolic domain: {}", to_domain(&nest)?);

    let backend: Box<dyn Backend> = if args.enumerate {
        Box::new(Enumerator)
    } else {
        let config = IsccConfig {
            search_paths: args.iscc_dir.clone(),
            ..IsccConfig::default()
        };
        match Iscc::locate(&config) {
            Ok(iscc) => Box::new(iscc),
            Err(e) => Box::new(Unavailable { reason: e.to_string() }),
        }
    };
    info!("exact backend: {}", backend.name());

    let time_total = std::time::Instant::now();
    let result = HybridCounter::new(backend).count(&nest, &params)?;

    println!("pattern: {:?}", result.pattern);
    // Pattern evaluation on the declared formula, even when the classifier has no rule.
    println!("formula: {}", args.pattern.evaluate(&params)?);
    match &result.fast {
        Some(count) => println!("fast count: {}", count),
        None => println!("fast count: none"),
    }
    match &result.exact {
        ExactCount::Counted { count, elapsed_ms } => println!("exact count: {} ({:.3} ms)", count, elapsed_ms),
        ExactCount::Unavailable { reason } => println!("exact count unavailable: {}", reason),
    }
    if let Some(agrees) = result.agrees() {
        println!("agree: {}", agrees);
    }

    println!("\nAll done in {:.3} s", time_total.elapsed().as_secs_f64());
    Ok(())
}
