/*
 * questlock: threshold-split credentials released through real-world quests
 * Copyright (C) 2018-2022 Aleksa Sarai <cyphar@cyphar.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

mod vault;

use std::{
    error::Error as StdError,
    fs::File,
    io,
    io::{prelude::*, BufReader},
};

use anyhow::{anyhow, Context, Error};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

extern crate questlock_core;
use questlock_core::{
    shamir::{self, Share},
    vault::generate_secret,
};

const DEFAULT_LOG_FILTER: &str = "questlock=info,questlock_core=info";

pub(crate) fn read_input(path: &str) -> Result<Vec<u8>, Error> {
    let (mut stdin_reader, mut file_reader);
    let input: &mut dyn Read = if path == "-" {
        stdin_reader = io::stdin();
        &mut stdin_reader
    } else {
        file_reader =
            File::open(path).with_context(|| format!("failed to open input file '{}'", path))?;
        &mut file_reader
    };

    let mut data = Vec::new();
    BufReader::new(input)
        .read_to_end(&mut data)
        .with_context(|| format!("failed to read data from '{}'", path))?;
    Ok(data)
}

pub(crate) fn write_output(path: &str, data: &[u8]) -> Result<(), Error> {
    let (mut stdout_writer, mut file_writer);
    let output: &mut dyn Write = if path == "-" {
        stdout_writer = io::stdout();
        &mut stdout_writer
    } else {
        file_writer = File::create(path)
            .with_context(|| format!("failed to open output file '{}' for writing", path))?;
        &mut file_writer
    };

    output
        .write_all(data)
        .with_context(|| format!("failed to write data to '{}'", path))
}

/// Parse share text: one encoded share per line, ignoring blank lines and
/// `#` comments.
pub(crate) fn parse_shares(text: &str) -> Result<Vec<Share>, Error> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(idx, line)| {
            Share::decode(line).with_context(|| format!("failed to decode share {}", idx + 1))
        })
        .collect()
}

/// Read shares from each of `paths` ("-" for stdin), or from stdin if there
/// are none.
pub(crate) fn read_shares<'a, I>(paths: Option<I>) -> Result<Vec<Share>, Error>
where
    I: IntoIterator<Item = &'a String>,
{
    let paths = match paths {
        Some(paths) => paths.into_iter().map(String::as_str).collect::<Vec<_>>(),
        None => vec!["-"],
    };

    let mut shares = Vec::new();
    for path in paths {
        let text = String::from_utf8(read_input(path)?)
            .with_context(|| format!("share file '{}' is not valid utf-8", path))?;
        shares.extend(parse_shares(&text).with_context(|| format!("reading '{}'", path))?);
    }
    Ok(shares)
}

pub(crate) fn print_shares(shares: &[Share]) {
    for share in shares {
        println!("{}", share.encode());
    }
}

pub(crate) fn share_files_arg() -> Arg {
    Arg::new("shares")
        .short('s')
        .long("share")
        .value_name("SHARE FILE")
        .help(r#"Path to a file of shares, one per line ("-" to read from stdin). Defaults to stdin."#)
        .action(ArgAction::Append)
        .allow_hyphen_values(true)
}

pub(crate) fn output_arg() -> Arg {
    Arg::new("OUTPUT")
        .help(r#"Path to write recovered secret data to ("-" to write to stdout)."#)
        .action(ArgAction::Set)
        .allow_hyphen_values(true)
        .required(true)
        .index(1)
}

fn parse_count(matches: &ArgMatches, name: &str) -> Result<usize, Error> {
    matches
        .get_one::<String>(name)
        .with_context(|| format!("required --{} argument not provided", name))?
        .parse()
        .with_context(|| format!("--{} argument was not an unsigned integer", name))
}

// questlock split [--checked] -k <THRESHOLD> -n <SHARES> INPUT
fn split_cli() -> Command {
    Command::new("split")
        .about("Split a secret into shares, any THRESHOLD of which can recover it.")
        .arg(
            Arg::new("checked")
                .long("checked")
                .help("Embed a checksum so that recovering from the wrong shares is detected.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("threshold")
                .short('k')
                .long("threshold")
                .value_name("THRESHOLD")
                .help("Number of shares required to recover the secret (must not be larger than --shares).")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new("shares")
                .short('n')
                .long("shares")
                .value_name("NUM SHARES")
                .help("Number of shares to create (at most 255).")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new("INPUT")
                .help(r#"Path to file containing secret data to split ("-" to read from stdin)."#)
                .action(ArgAction::Set)
                .allow_hyphen_values(true)
                .required(true)
                .index(1),
        )
}

fn split(matches: &ArgMatches) -> Result<(), Error> {
    let checked = matches.get_flag("checked");
    let threshold = parse_count(matches, "threshold")?;
    let num_shares = parse_count(matches, "shares")?;
    let input_path = matches
        .get_one::<String>("INPUT")
        .context("required INPUT argument not provided")?;

    let secret = read_input(input_path)?;
    let shares = if checked {
        shamir::split_checked(&secret, num_shares, threshold)
    } else {
        shamir::split(&secret, num_shares, threshold)
    }
    .context("splitting secret")?;
    info!(threshold, shares = shares.len(), checked, "split secret");

    println!("# {} of {} shares required", threshold, num_shares);
    print_shares(&shares);
    Ok(())
}

// questlock combine [--checked] [--share <SHARE FILE>]... OUTPUT
fn combine_cli() -> Command {
    Command::new("combine")
        .about("Recover a secret from a set of shares.")
        .arg(
            Arg::new("checked")
                .long("checked")
                .help("The shares were created with `split --checked`; verify the embedded checksum.")
                .action(ArgAction::SetTrue),
        )
        .arg(share_files_arg())
        .arg(output_arg())
}

fn combine(matches: &ArgMatches) -> Result<(), Error> {
    let checked = matches.get_flag("checked");
    let output_path = matches
        .get_one::<String>("OUTPUT")
        .context("required OUTPUT argument not provided")?;

    let shares = read_shares(matches.get_many::<String>("shares"))?;
    info!(shares = shares.len(), checked, "combining shares");
    let secret = if checked {
        shamir::combine_checked(&shares)
    } else {
        shamir::combine(&shares)
    }
    .context("recovering secret data")?;

    write_output(output_path, &secret)
}

// questlock generate [--length <LENGTH>]
fn generate_cli() -> Command {
    Command::new("generate")
        .about("Generate a random printable credential.")
        .arg(
            Arg::new("length")
                .short('l')
                .long("length")
                .value_name("LENGTH")
                .help("Number of characters to generate.")
                .action(ArgAction::Set)
                .default_value("32"),
        )
}

fn generate(matches: &ArgMatches) -> Result<(), Error> {
    println!("{}", generate_secret(parse_count(matches, "length")?));
    Ok(())
}

fn cli() -> Command {
    Command::new("questlock")
        .version("0.0.0")
        .author("Aleksa Sarai <cyphar@cyphar.com>")
        .about("Split credentials into shares and lock some of them behind real-world quests.")
        // questlock split [--checked] -k <THRESHOLD> -n <SHARES> INPUT
        .subcommand(split_cli())
        // questlock combine [--checked] [--share <SHARE FILE>]... OUTPUT
        .subcommand(combine_cli())
        // questlock generate [--length <LENGTH>]
        .subcommand(generate_cli())
        // questlock vault ...
        .subcommand(vault::subcommands())
}

fn main() -> Result<(), Box<dyn StdError>> {
    // Logs go to stderr, stdout is reserved for shares and secrets.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(io::stderr)
        .init();

    let mut app = cli();

    let ret = match app.get_matches_mut().subcommand() {
        Some(("split", sub_matches)) => split(sub_matches),
        Some(("combine", sub_matches)) => combine(sub_matches),
        Some(("generate", sub_matches)) => generate(sub_matches),
        Some(("vault", sub_matches)) => vault::submatch(&mut app, sub_matches),
        Some((subcommand, _)) => {
            // We should never end up here.
            app.print_help()?;
            Err(anyhow!("unknown subcommand '{}'", subcommand))
        }
        None => {
            app.print_help()?;
            Err(anyhow!("no subcommand specified"))
        }
    }?;

    Ok(ret)
}

#[test]
fn verify_cli() {
    cli().debug_assert();
}

#[test]
fn parse_share_text() {
    let shares = shamir::split(b"pass", 3, 2).unwrap();
    let text = format!(
        "# 2 of 3 shares required\n{}\n\n  {}  \n",
        shares[0].encode(),
        shares[2].encode()
    );
    let parsed = parse_shares(&text).unwrap();
    assert_eq!(parsed, vec![shares[0].clone(), shares[2].clone()]);
    assert_eq!(shamir::combine(&parsed).unwrap(), b"pass");

    assert!(parse_shares("# nothing here\n").unwrap().is_empty());
    assert!(parse_shares("h!!!\n").is_err());
}
