// Palette Engine — CLI entry point.
//
// Loads a palette description (JSON), resolves every slot, and writes the
// result as a Standard MIDI File. The pipeline: load → resolve → serialize.
//
// Usage:
//   cargo run -p palette_engine --bin render -- <palette.json> [output.mid]
//     [--channel N] [--config midi.json]
//
// Progress is logged through tracing at info level.

use palette_engine::midi::{MidiConfig, write_midi};
use palette_engine::{Palette, SlotEvent, resolve_palette};
use std::path::Path;
use tracing::{error, info};

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();

    let positional: Vec<&str> = positional_args(&args);
    let Some(palette_path) = positional.first().copied() else {
        usage();
    };
    let output_path = positional.get(1).copied().unwrap_or("palette.mid");

    let mut config = match flag_or_usage::<String>(&args, "--config") {
        Some(path) => match MidiConfig::load(Path::new(&path)) {
            Ok(c) => c,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => MidiConfig::default(),
    };
    if let Some(channel) = flag_or_usage(&args, "--channel") {
        config.channel = channel;
    }

    info!(path = palette_path, "loading palette");
    let palette = match Palette::load(Path::new(palette_path)) {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!(
        name = palette.name.as_str(),
        slots = palette.slots.len(),
        duration_ms = palette.total_duration_ms(),
        "palette loaded"
    );

    let slots = match resolve_palette(&palette) {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let rests = slots
        .iter()
        .filter(|s| matches!(s.event, SlotEvent::Rest { .. }))
        .count();
    let sub_events: usize = slots.iter().map(|s| s.event.sub_events().len()).sum();
    info!(rests, sub_events, "palette resolved");

    match write_midi(&slots, &config, Path::new(output_path)) {
        Ok(()) => info!(path = output_path, "MIDI written"),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Arguments that are neither flags nor flag values.
fn positional_args(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
        } else if arg.starts_with("--") {
            skip_next = true;
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

fn usage() -> ! {
    eprintln!("Usage: render <palette.json> [output.mid] [--channel N] [--config midi.json]");
    std::process::exit(2);
}

/// Value of an optional flag. A flag that is present with a missing or
/// unparsable value is an error.
fn flag_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>, String> {
    if !args.iter().any(|a| a == flag) {
        return Ok(None);
    }
    parse_flag(args, flag)
        .map(Some)
        .ok_or_else(|| format!("{flag} needs a valid value"))
}

/// `flag_value`, exiting with the usage message on error.
fn flag_or_usage<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    flag_value(args, flag).unwrap_or_else(|e| {
        eprintln!("{e}");
        usage()
    })
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
