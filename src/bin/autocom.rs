use anyhow::{bail, Context, Result};
use log::info;
use std::env;

use autocom::{literal, Config, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Call,
    Get,
    Put,
}

#[derive(Debug, PartialEq)]
struct Request {
    verbose: bool,
    config_path: Option<String>,
    prog_id: String,
    verb: Verb,
    member: String,
    literals: Vec<String>,
}

fn print_usage() {
    println!("Usage: autocom [--verbose] [--config FILE] <prog-id> (call|get|put) <member> [args...]");
    println!();
    println!("Arguments are literals: 12, 1.5, true, text, or kind:value with kind one of");
    println!("  i1 ui1 i2 ui2 i4 ui4 i8 ui8 int uint r4 r8 cy date bool error str null empty");
    println!();
    println!("Example: autocom WScript.Shell call Run notepad.exe i2:1 bool:false");
}

/// Help is only a flag among the leading options. After the prog-id it is an ordinary literal.
fn wants_help(args: &[String]) -> bool {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return true,
            "--verbose" | "-v" => {}
            "--config" | "-c" => {
                iter.next();
            }
            _ => return false,
        }
    }
    false
}

fn parse_request(args: &[String]) -> Result<Request> {
    let mut verbose = false;
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--verbose" | "-v" if positional.is_empty() => verbose = true,
            "--config" | "-c" if positional.is_empty() => {
                let path = iter.next().context("--config needs a file name")?;
                config_path = Some(path.clone());
            }
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    let (Some(prog_id), Some(verb), Some(member)) =
        (positional.next(), positional.next(), positional.next())
    else {
        bail!("expected <prog-id> <call|get|put> <member>");
    };
    let verb = match verb.to_ascii_lowercase().as_str() {
        "call" => Verb::Call,
        "get" => Verb::Get,
        "put" => Verb::Put,
        other => bail!("unknown verb '{}'", other),
    };
    let literals: Vec<String> = positional.collect();
    if verb == Verb::Put && literals.is_empty() {
        bail!("put needs a value");
    }
    Ok(Request {
        verbose,
        config_path,
        prog_id,
        verb,
        member,
        literals,
    })
}

fn main() {
    match real_main() {
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

fn real_main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || wants_help(&args) {
        print_usage();
        return Ok(());
    }
    let request = parse_request(&args)?;

    let config = match &request.config_path {
        Some(path) => Config::load_from_file(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if request.verbose {
        env_logger::builder().filter_level(log::LevelFilter::Debug).init();
    } else {
        env_logger::builder().filter_level(config.log_level()?).init();
    }

    let values = literal::parse_all(request.literals.iter().map(String::as_str))
        .context("Failed to parse arguments")?;
    info!(
        "{:?} {}.{} with {} argument(s)",
        request.verb,
        request.prog_id,
        request.member,
        values.len()
    );

    let result = run(&config, &request, values)?;
    if !result.is_empty() {
        println!("{}", result);
    }
    Ok(())
}

#[cfg(windows)]
fn run(config: &Config, request: &Request, values: Vec<Variant>) -> Result<Variant> {
    use autocom::{Apartment, DispatchClient, InvokeKind};

    let _apartment = Apartment::enter(config.activation.apartment)?;
    let mut client = DispatchClient::from_prog_id(&request.prog_id, config)
        .with_context(|| format!("Failed to activate {}", request.prog_id))?;
    let kind = match request.verb {
        Verb::Call => InvokeKind::Method,
        Verb::Get => InvokeKind::PropertyGet,
        Verb::Put => InvokeKind::PropertyPut,
    };
    let result = client
        .invoke(&request.member, kind, values)
        .with_context(|| format!("{}.{} failed", request.prog_id, request.member))?;
    Ok(result)
}

#[cfg(not(windows))]
fn run(_config: &Config, request: &Request, _values: Vec<Variant>) -> Result<Variant> {
    bail!("activating {} needs a Windows COM runtime", request.prog_id)
}
