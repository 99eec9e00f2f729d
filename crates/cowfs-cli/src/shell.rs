//! Interactive append session.
//!
//! Each plain input line is appended (with its newline) as a new version.
//! Lines starting with `:` are commands.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::Result;
use cowfs_config::log_cli_debug;
use cowfs_core::{CowEngine, CowError};

use crate::report;

const HELP: &str = "\
  :cat [N]   print the current version (or version N)
  :undo      step back one version
  :log       list versions
  :help      this text
  :q         close the file and leave";

pub fn run(engine: &CowEngine, name: &str, import: Option<&Path>) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_with(engine, name, import, stdin.lock(), stdout.lock())
}

fn run_with<R: BufRead, W: Write>(
    engine: &CowEngine,
    name: &str,
    import: Option<&Path>,
    input: R,
    mut out: W,
) -> Result<()> {
    match engine.open(name, import) {
        Err(CowError::FileNotFound(_)) => engine.create(name, false)?,
        other => other?,
    }
    writeln!(out, "Editing '{}'. Type :help for commands.", name)?;

    let result = session_loop(engine, name, input, &mut out);
    engine.close(name)?;
    result
}

fn session_loop<R: BufRead, W: Write>(
    engine: &CowEngine,
    name: &str,
    input: R,
    out: &mut W,
) -> Result<()> {
    write!(out, "{}> ", name)?;
    out.flush()?;
    for line in input.lines() {
        let line = line?;
        match parse_line(&line) {
            Input::Quit => break,
            Input::Help => writeln!(out, "{}", HELP)?,
            Input::Log => report::print_versions(&engine.metadata(name)?, out)?,
            Input::Undo => match engine.undo(name) {
                Ok(v) => writeln!(out, "now at version {}", v)?,
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            Input::Cat(version) => match engine.read(name, version) {
                Ok(bytes) => {
                    out.write_all(&bytes)?;
                    if !bytes.ends_with(b"\n") {
                        writeln!(out)?;
                    }
                }
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            Input::Unknown(cmd) => writeln!(out, "unknown command :{} (try :help)", cmd)?,
            Input::Append(text) => {
                let mut data = text.as_bytes().to_vec();
                data.push(b'\n');
                let n = engine.write(name, &data)?;
                log_cli_debug!("shell append", filename = name, bytes = n);
            }
        }
        write!(out, "{}> ", name)?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Input<'a> {
    Append(&'a str),
    Cat(Option<usize>),
    Undo,
    Log,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_line(line: &str) -> Input<'_> {
    let Some(cmd) = line.strip_prefix(':') else {
        return Input::Append(line);
    };
    let mut parts = cmd.split_whitespace();
    match (parts.next().unwrap_or(""), parts.next()) {
        ("q" | "quit" | "exit", _) => Input::Quit,
        ("help" | "h", _) => Input::Help,
        ("undo" | "u", _) => Input::Undo,
        ("log", _) => Input::Log,
        ("cat", None) => Input::Cat(None),
        ("cat", Some(n)) => match n.parse() {
            Ok(v) => Input::Cat(Some(v)),
            Err(_) => Input::Unknown(cmd),
        },
        _ => Input::Unknown(cmd),
    }
}
