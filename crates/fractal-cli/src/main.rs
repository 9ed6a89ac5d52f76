use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::time::Duration;

use fractal_core::{generate_fallback, ParameterSet};
use fractal_engine::{BusyPolicy, ComputeInvoker, GenerationService};

type DynError = Box<dyn Error>;
type Flags = HashMap<String, String>;

#[tokio::main]
async fn main() -> Result<(), DynError> {
    tracing_subscriber::fmt::init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    match args[0].as_str() {
        "generate" => run_generate(&args[1..]).await,
        "fallback" => run_fallback(&args[1..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

async fn run_generate(args: &[String]) -> Result<(), DynError> {
    let flags = parse_flags(args)?;
    let params = params_from_flags(&flags)?;
    params.validate()?;

    let binary = required_str(&flags, "--binary")?;
    let workdir = optional_str(&flags, "--workdir", ".");
    let output = required_str(&flags, "--output")?;

    let mut invoker = ComputeInvoker::new(binary, workdir);
    if let Some(secs) = flags.get("--timeout-secs") {
        let secs = secs
            .parse::<u64>()
            .map_err(|err| format!("invalid u64 for --timeout-secs: {err}"))?;
        invoker = invoker.with_timeout(Duration::from_secs(secs));
    }

    let service = GenerationService::new(invoker, BusyPolicy::Reject);
    let payload = service.generate(&params).await?;

    eprintln!(
        "generated {} triangles from {:?} source",
        payload.triangle_count,
        payload.source()
    );
    fs::write(output, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

fn run_fallback(args: &[String]) -> Result<(), DynError> {
    let flags = parse_flags(args)?;
    let params = params_from_flags(&flags)?;
    params.validate()?;

    let output = required_str(&flags, "--output")?;
    let payload = generate_fallback(&params);

    eprintln!("generated {} fallback triangles", payload.triangle_count);
    fs::write(output, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

fn params_from_flags(flags: &Flags) -> Result<ParameterSet, DynError> {
    let defaults = ParameterSet::default();
    let iterations = optional_u32(flags, "--iterations", defaults.iterations)?;
    let grid_size = optional_u32(flags, "--grid", defaults.grid_size)?;
    let c = match flags.get("--c") {
        Some(raw) => parse_c(raw)?,
        None => defaults.c,
    };
    Ok(ParameterSet::new(iterations, c, grid_size))
}

fn parse_c(raw: &str) -> Result<[f64; 4], DynError> {
    let parts = raw.split(',').collect::<Vec<_>>();
    if parts.len() != 4 {
        return Err(format!("--c expects 4 comma-separated floats, got {}", parts.len()).into());
    }
    let mut c = [0.0f64; 4];
    for (slot, part) in c.iter_mut().zip(parts) {
        *slot = part
            .trim()
            .parse::<f64>()
            .map_err(|err| format!("invalid float in --c: {err}"))?;
    }
    Ok(c)
}

fn parse_flags(args: &[String]) -> Result<Flags, DynError> {
    if !args.len().is_multiple_of(2) {
        return Err("expected flag-value pairs".into());
    }

    let mut flags = HashMap::new();
    let mut index = 0;
    while index < args.len() {
        let flag = args[index].as_str();
        if !flag.starts_with("--") {
            return Err(format!("expected flag at position {}", index + 1).into());
        }
        let value = args[index + 1].clone();
        if flags.insert(flag.to_string(), value).is_some() {
            return Err(format!("duplicate flag: {flag}").into());
        }
        index += 2;
    }
    Ok(flags)
}

fn required_str<'a>(flags: &'a Flags, key: &str) -> Result<&'a str, DynError> {
    flags
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| format!("missing required {key}").into())
}

fn optional_str<'a>(flags: &'a Flags, key: &str, default: &'a str) -> &'a str {
    flags.get(key).map(String::as_str).unwrap_or(default)
}

fn optional_u32(flags: &Flags, key: &str, default: u32) -> Result<u32, DynError> {
    match flags.get(key) {
        Some(value) => value
            .parse::<u32>()
            .map_err(|err| format!("invalid u32 for {key}: {err}").into()),
        None => Ok(default),
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  fractal-cli generate --binary <path> --output <path> [--workdir <path>] \
         [--iterations <u32>] [--c <a,b,c,d>] [--grid <u32>] [--timeout-secs <u64>]"
    );
    eprintln!(
        "  fractal-cli fallback --output <path> [--iterations <u32>] [--c <a,b,c,d>] \
         [--grid <u32>]"
    );
}
