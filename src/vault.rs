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

use crate::{output_arg, print_shares, read_input, read_shares, share_files_arg, write_output};

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{prelude::*, BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Error};
use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, info};

use questlock_core::{
    config::Config,
    lock::{
        evaluate::{Clock, Evidence, ManualClock, SystemClock},
        quest::{QuestCondition, QuestType},
        Lock, LockId, Principal, QuestId,
    },
    vault::{self as qvault, MemoryStore, VaultService},
};

/// A vault backed by a JSON snapshot file.
///
/// The store only serialises updates within this process, so the whole
/// load-modify-save cycle runs under an exclusive lock on `<vault>.lock`,
/// held until the `Vault` is dropped.
struct Vault {
    path: PathBuf,
    store: Arc<MemoryStore>,
    service: VaultService,
    _guard: File,
}

/// Take the advisory lock guarding the vault at `path`, waiting for any other
/// questlock process using it to finish.
fn lock_vault(path: &Path) -> Result<File, Error> {
    let mut lock_path = OsString::from(path.as_os_str());
    lock_path.push(".lock");
    let lock_path = PathBuf::from(lock_path);

    let guard = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open vault lock '{}'", lock_path.display()))?;
    if guard.try_lock_exclusive().is_err() {
        info!(path = %lock_path.display(), "vault is in use, waiting for lock");
        guard
            .lock_exclusive()
            .with_context(|| format!("failed to lock '{}'", lock_path.display()))?;
    }
    Ok(guard)
}

impl Vault {
    fn open(matches: &ArgMatches) -> Result<Self, Error> {
        let config = Config::load(matches.get_one::<String>("config").map(Path::new))
            .context("loading configuration")?;
        let path = PathBuf::from(
            matches
                .get_one::<String>("vault")
                .context("required --vault argument not provided")?,
        );

        // Must be held before the snapshot is read.
        let guard = lock_vault(&path)?;
        let locks: Vec<Lock> = if path.exists() {
            let file = File::open(&path)
                .with_context(|| format!("failed to open vault file '{}'", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("failed to parse vault file '{}'", path.display()))?
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), locks = locks.len(), "opened vault");

        let clock: Arc<dyn Clock> = match matches.get_one::<String>("now") {
            Some(now) => Arc::new(ManualClock::new(
                DateTime::parse_from_rfc3339(now)
                    .with_context(|| format!("--now argument '{}' is not an RFC 3339 timestamp", now))?
                    .with_timezone(&Utc),
            )),
            None => Arc::new(SystemClock),
        };

        let store = Arc::new(MemoryStore::from_locks(locks));
        Ok(Self {
            path,
            service: VaultService::new(store.clone(), clock, config.policy),
            store,
            _guard: guard,
        })
    }

    /// Write the store back out, replacing the old snapshot atomically.
    fn save(&self) -> Result<(), Error> {
        let locks = self.store.snapshot()?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(
                File::create(&tmp_path)
                    .with_context(|| format!("failed to create '{}'", tmp_path.display()))?,
            );
            serde_json::to_writer_pretty(&mut writer, &locks).context("serialising vault")?;
            writer.flush().context("writing vault")?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to replace vault file '{}'", self.path.display()))?;
        debug!(path = %self.path.display(), locks = locks.len(), "saved vault");
        Ok(())
    }
}

fn principal(matches: &ArgMatches) -> Result<Principal, Error> {
    matches
        .get_one::<String>("principal")
        .map(|id| Principal::new(id.as_str()))
        .context("this command requires --principal")
}

fn lock_id(matches: &ArgMatches) -> Result<LockId, Error> {
    matches
        .get_one::<String>("LOCK-ID")
        .context("required LOCK-ID argument not provided")?
        .parse()
        .context("LOCK-ID is not a valid lock identifier")
}

fn quest_id(matches: &ArgMatches) -> Result<QuestId, Error> {
    matches
        .get_one::<String>("QUEST-ID")
        .context("required QUEST-ID argument not provided")?
        .parse()
        .context("QUEST-ID is not a valid quest identifier")
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialising output")?
    );
    Ok(())
}

/// Parse a `TYPE:JSON` quest description.
fn parse_quest(quest: &str) -> Result<QuestCondition, Error> {
    let (quest_type, data) = quest
        .split_once(':')
        .with_context(|| format!("quest '{}' is not of the form TYPE:JSON", quest))?;
    let quest_type: QuestType = quest_type.parse().map_err(|err: String| anyhow!(err))?;
    let data = serde_json::from_str(data)
        .with_context(|| format!("{} quest data is not valid JSON", quest_type))?;
    Ok(QuestCondition::from_parts(quest_type, data)?)
}

fn lock_id_arg() -> Arg {
    Arg::new("LOCK-ID")
        .help("Identifier of the lock.")
        .action(ArgAction::Set)
        .required(true)
        .index(1)
}

fn quest_id_arg() -> Arg {
    Arg::new("QUEST-ID")
        .help("Identifier of the quest.")
        .action(ArgAction::Set)
        .required(true)
        .index(2)
}

// questlock vault lock [--label <LABEL>] --quest <TYPE:JSON>... (INPUT | --generate <LENGTH>)
fn lock_cli() -> Command {
    Command::new("lock")
        .about("Split a secret and store a lock whose custodial shares are released by quests. The client-held shares are printed and must be kept safe.")
        .arg(Arg::new("label")
            .long("label")
            .value_name("LABEL")
            .help("Human-readable name for the lock.")
            .action(ArgAction::Set))
        .arg(Arg::new("quests")
            .short('q')
            .long("quest")
            .value_name("TYPE:JSON")
            .help(r#"Quest guarding one custodial share, such as 'PAYWALL:{"amount": 500}'. TYPE is one of GEO, TIME, FRIEND or PAYWALL."#)
            .action(ArgAction::Append)
            .required(true))
        .arg(Arg::new("generate")
            .long("generate")
            .value_name("LENGTH")
            .help("Generate a random credential of LENGTH characters instead of reading one. It is printed to stderr.")
            .action(ArgAction::Set))
        .arg(Arg::new("INPUT")
            .help(r#"Path to file containing secret data to lock ("-" to read from stdin)."#)
            .action(ArgAction::Set)
            .allow_hyphen_values(true)
            .index(1))
        .group(ArgGroup::new("secret")
            .arg("generate")
            .arg("INPUT")
            .required(true))
}

fn lock(vault: &Vault, owner: &Principal, matches: &ArgMatches) -> Result<(), Error> {
    let label = matches.get_one::<String>("label").cloned();
    let conditions = matches
        .get_many::<String>("quests")
        .context("required --quest argument not provided")?
        .map(|quest| parse_quest(quest))
        .collect::<Result<Vec<_>, Error>>()?;

    let secret = match matches.get_one::<String>("generate") {
        Some(length) => {
            let length: usize = length
                .parse()
                .context("--generate argument was not an unsigned integer")?;
            let secret = qvault::generate_secret(length);
            eprintln!("Generated secret: {}", secret);
            secret.into_bytes()
        }
        None => read_input(
            matches
                .get_one::<String>("INPUT")
                .context("neither INPUT nor --generate provided")?,
        )?,
    };

    let prepared = qvault::prepare_lock(&secret, label, vault.service.policy(), conditions)
        .context("preparing lock")?;
    let view = vault
        .service
        .create_lock(owner, &prepared.request)
        .context("creating lock")?;
    vault.save()?;

    println!("# Lock-ID: {}", view.id);
    for quest in &view.quests {
        println!("# Quest-ID: {} ({})", quest.id, quest.quest_type);
    }
    println!(
        "# {} of {} shares required, {} held by quests",
        view.threshold,
        view.total_shares,
        view.quests.len()
    );
    print_shares(&prepared.client_shares);
    Ok(())
}

// questlock vault recover [--share <SHARE FILE>]... LOCK-ID OUTPUT
fn recover_cli() -> Command {
    Command::new("recover")
        .about("Recover a locked secret from client-held shares and the custodial shares released so far.")
        .arg(share_files_arg())
        .arg(lock_id_arg())
        .arg(output_arg().index(2))
}

fn recover(vault: &Vault, owner: &Principal, matches: &ArgMatches) -> Result<(), Error> {
    let lock_id = lock_id(matches)?;
    let output_path = matches
        .get_one::<String>("OUTPUT")
        .context("required OUTPUT argument not provided")?;

    let view = vault.service.get_lock(owner, lock_id)?;
    let client_shares = read_shares(matches.get_many::<String>("shares"))?;
    let secret = qvault::recover(&client_shares, &view).context("recovering secret data")?;
    info!(%lock_id, "recovered locked secret");

    write_output(output_path, &secret)
}

// questlock vault evaluate [--evidence <JSON>] LOCK-ID QUEST-ID
fn evaluate_cli() -> Command {
    Command::new("evaluate")
        .about("Submit evidence for a quest and record the verdict.")
        .arg(Arg::new("evidence")
            .short('e')
            .long("evidence")
            .value_name("JSON")
            .help(r#"Evidence, such as '{"kind": "location", "latitude": 48.858, "longitude": 2.294}'. Kinds are none, location, guardian_confirmation and payment."#)
            .action(ArgAction::Set)
            .default_value(r#"{"kind": "none"}"#))
        .arg(lock_id_arg())
        .arg(quest_id_arg())
}

fn evaluate(vault: &Vault, owner: &Principal, matches: &ArgMatches) -> Result<(), Error> {
    let evidence: Evidence = serde_json::from_str(
        matches
            .get_one::<String>("evidence")
            .context("required --evidence argument not provided")?,
    )
    .context("--evidence argument is not valid evidence JSON")?;

    let quest = vault
        .service
        .evaluate_quest(owner, lock_id(matches)?, quest_id(matches)?, &evidence)?;
    vault.save()?;
    print_json(&quest)
}

pub(crate) fn subcommands() -> Command {
    Command::new("vault")
        .about("Manage locks stored in a local vault file.")
        .subcommand_required(true)
        .arg(Arg::new("vault")
            .long("vault")
            .value_name("VAULT FILE")
            .help("Path to the vault file (created if it does not exist).")
            .action(ArgAction::Set)
            .required(true))
        .arg(Arg::new("principal")
            .short('p')
            .long("principal")
            .value_name("ID")
            .help("Identity of the user on whose behalf the command runs.")
            .action(ArgAction::Set))
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("CONFIG FILE")
            .help("Path to a questlock.toml (defaults to $QUESTLOCK_CONFIG, then ./questlock.toml).")
            .action(ArgAction::Set))
        .arg(Arg::new("now")
            .long("now")
            .value_name("TIMESTAMP")
            .help("Evaluate quests as if the current time were TIMESTAMP (RFC 3339).")
            .action(ArgAction::Set))
        // questlock vault lock [--label <LABEL>] --quest <TYPE:JSON>... (INPUT | --generate <LENGTH>)
        .subcommand(lock_cli())
        // questlock vault list
        .subcommand(Command::new("list").about("List the locks owned by the principal."))
        // questlock vault show LOCK-ID
        .subcommand(Command::new("show")
            .about("Show a lock, including any released custodial shares.")
            .arg(lock_id_arg()))
        // questlock vault attempt LOCK-ID QUEST-ID
        .subcommand(Command::new("attempt")
            .about("Record that an attempt at a quest has started.")
            .arg(lock_id_arg())
            .arg(quest_id_arg()))
        // questlock vault evaluate [--evidence <JSON>] LOCK-ID QUEST-ID
        .subcommand(evaluate_cli())
        // questlock vault tick
        .subcommand(Command::new("tick").about("Complete every TIME quest whose release date has passed."))
        // questlock vault recover [--share <SHARE FILE>]... LOCK-ID OUTPUT
        .subcommand(recover_cli())
}

pub(crate) fn submatch(app: &mut Command, matches: &ArgMatches) -> Result<(), Error> {
    let vault = Vault::open(matches)?;

    match matches.subcommand() {
        Some(("lock", sub_matches)) => lock(&vault, &principal(matches)?, sub_matches),
        Some(("list", _)) => print_json(&vault.service.query_locks(&principal(matches)?)?),
        Some(("show", sub_matches)) => {
            print_json(&vault.service.get_lock(&principal(matches)?, lock_id(sub_matches)?)?)
        }
        Some(("attempt", sub_matches)) => {
            let quest = vault.service.register_attempt(
                &principal(matches)?,
                lock_id(sub_matches)?,
                quest_id(sub_matches)?,
            )?;
            vault.save()?;
            print_json(&quest)
        }
        Some(("evaluate", sub_matches)) => evaluate(&vault, &principal(matches)?, sub_matches),
        Some(("tick", _)) => {
            let completed = vault.service.evaluate_due_time_quests()?;
            vault.save()?;
            info!(completed, "time quests evaluated");
            Ok(())
        }
        Some(("recover", sub_matches)) => recover(&vault, &principal(matches)?, sub_matches),
        Some((subcommand, _)) => {
            // We should never end up here.
            app.print_help()?;
            Err(anyhow!("unknown subcommand 'vault {}'", subcommand))
        }
        None => {
            app.print_help()?;
            Err(anyhow!("no 'vault' subcommand specified"))
        }
    }
}
