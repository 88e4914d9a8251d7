//! Standalone entry point for tracelink.
//!
//! A real deployment embeds the tracelink library inside a host DBI
//! engine's tool and forwards the engine's callbacks into a
//! `tracelink::tracer::Tracer`. This binary covers the command-line
//! surface: it resolves the user script that the callback dispatcher will
//! execute, and fails loudly when it cannot.

#![deny(unused_must_use)]

use clap::{App, Arg};
use log::{Level, LevelFilter, Metadata, Record};
use std::path::Path;
use std::process;
use tracelink::Error;

struct StdoutLogger;

impl log::Log for StdoutLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StdoutLogger = StdoutLogger;

fn resolve_script(script: &str) -> Result<(), Error> {
    if !Path::new(script).is_file() {
        return Err(Error::ScriptNotFound(script.to_string()));
    }
    log::info!("script {} resolved", script);
    Ok(())
}

fn main() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }

    let matches = App::new("tracelink")
        .about("A bridge between DBI engines and symbolic analysis")
        .arg(
            Arg::with_name("script")
                .short("s")
                .long("script")
                .value_name("PATH")
                .help("User script executed by the callback dispatcher")
                .takes_value(true)
                .required(true),
        )
        .get_matches();

    let script = matches.value_of("script").unwrap_or("");
    if let Err(error) = resolve_script(script) {
        log::error!("{}", error);
        process::exit(1);
    }
}
