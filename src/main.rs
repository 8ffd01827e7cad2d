// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

#[macro_use]
extern crate log;

use std::collections::BTreeMap;
use std::io;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ready_group::{ParticipantId, ReadyGroup, ReadyGroupConfig};
use ready_group_cli::cli_print_error_chain;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
enum Error {
    #[error("Signal delay of participant {0} overflows")]
    DelayOverflow(ParticipantId),
    #[error("Invalid straggler id {0:?}: {1}")]
    InvalidStraggler(String, #[source] std::num::ParseIntError),
    #[error("Error starting the ready group: {0}")]
    Start(#[source] ready_group::Error),
    #[error("Error signalling participant {0}: {1}")]
    Signal(ParticipantId, #[source] ready_group::Error),
    #[error("Error spawning participant thread: {0}")]
    ThreadSpawn(#[source] io::Error),
    #[error("Participant thread panicked")]
    ThreadPanic,
    #[error("Error serializing the report: {0}")]
    Report(#[source] serde_json::Error),
}

struct Params {
    participants: u64,
    interval: Duration,
    timeout: Duration,
    wait: Duration,
    stragglers: Vec<ParticipantId>,
    force: bool,
}

impl Params {
    fn from_matches(matches: &ArgMatches) -> Result<Self, Error> {
        // These .unwrap()s cannot fail as there is a default value defined
        let participants = *matches.get_one::<u64>("participants").unwrap();
        let interval = *matches.get_one::<u64>("interval-ms").unwrap();
        let timeout = *matches.get_one::<u64>("timeout-ms").unwrap();
        let wait = *matches.get_one::<u64>("wait-ms").unwrap();

        let stragglers = match matches.get_one::<String>("stragglers") {
            Some(list) => parse_stragglers(list)?,
            None => Vec::new(),
        };

        Ok(Params {
            participants,
            interval: Duration::from_millis(interval),
            timeout: Duration::from_millis(timeout),
            wait: Duration::from_millis(wait),
            stragglers,
            force: !matches.get_flag("no-force"),
        })
    }
}

fn parse_stragglers(list: &str) -> Result<Vec<ParticipantId>, Error> {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<ParticipantId>()
                .map_err(|e| Error::InvalidStraggler(id.to_string(), e))
        })
        .collect()
}

/// Participant `id` signals `interval * (id + 1)` after the start.
fn signal_delay(interval: Duration, id: ParticipantId) -> Result<Duration, Error> {
    id.checked_add(1)
        .and_then(|n| u32::try_from(n).ok())
        .and_then(|n| interval.checked_mul(n))
        .ok_or(Error::DelayOverflow(id))
}

fn create_app() -> Command {
    Command::new("readygroup")
        .version(env!("BUILT_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Run a ready group where simulated participants signal readiness one by one.")
        .arg(
            Arg::new("interval-ms")
                .long("interval-ms")
                .help("Delay between two participants signalling, in milliseconds")
                .num_args(1)
                .value_parser(value_parser!(u64))
                .default_value("100"),
        )
        .arg(
            Arg::new("no-force")
                .long("no-force")
                .help("Do not force stragglers ready when the deadline expires")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("participants")
                .long("participants")
                .help("Number of participants, numbered from 0")
                .num_args(1)
                .value_parser(value_parser!(u64))
                .default_value("10"),
        )
        .arg(
            Arg::new("stragglers")
                .long("stragglers")
                .help("Comma separated ids of participants which never signal")
                .num_args(1),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .help("Group deadline in milliseconds, 0 disables it")
                .num_args(1)
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("wait-ms")
                .long("wait-ms")
                .help("Give up waiting for completion after this many milliseconds")
                .num_args(1)
                .value_parser(value_parser!(u64))
                .default_value("10000"),
        )
}

fn start_ready_group(params: &Params) -> Result<bool, Error> {
    let timed_out = Arc::new(AtomicBool::new(false));

    let mut config = ReadyGroupConfig::new()
        .timeout(params.timeout)
        .on_completed(|group| info!("{}: every participant is ready", group.name()));

    let stragglers = params.stragglers.clone();
    let force = params.force;
    let on_timeout_flag = timed_out.clone();
    config = config.on_timeout(move |group| {
        on_timeout_flag.store(true, Ordering::SeqCst);
        if !force {
            warn!("Deadline expired, leaving stragglers {:?} alone", stragglers);
            return;
        }

        warn!("Deadline expired, forcing stragglers {:?}", stragglers);
        for id in stragglers.iter() {
            if let Err(e) = group.ready(*id) {
                error!("Error forcing participant {}: {}", id, e);
            }
        }
    });

    let signals = (0..params.participants)
        .filter(|id| !params.stragglers.contains(id))
        .map(|id| signal_delay(params.interval, id).map(|delay| (id, delay)))
        .collect::<Result<Vec<_>, Error>>()?;

    let group = ReadyGroup::new(config);
    for id in 0..params.participants {
        group.add(id, false);
    }
    group.start().map_err(Error::Start)?;

    let mut producers = Vec::new();
    for (id, delay) in signals {
        let group = group.clone();
        let producer = thread::Builder::new()
            .name(format!("participant-{id}"))
            .spawn(move || {
                thread::sleep(delay);
                debug!("Participant {} is ready", id);
                group.ready(id).map_err(|e| Error::Signal(id, e))
            })
            .map_err(Error::ThreadSpawn)?;
        producers.push(producer);
    }

    let completed = group.wait_timeout(params.wait) && group.is_completed();

    for producer in producers {
        producer.join().map_err(|_| Error::ThreadPanic)??;
    }
    let participants: BTreeMap<ParticipantId, bool> =
        group.participant_states().into_iter().collect();
    group.stop();

    let report = json!({
        "completed": completed,
        "timed_out": timed_out.load(Ordering::SeqCst),
        "participants": participants,
    });
    println!(
        "{}",
        serde_json::to_string(&report).map_err(Error::Report)?
    );

    Ok(completed)
}

fn main() {
    env_logger::init();

    let matches = create_app().get_matches();

    let result = Params::from_matches(&matches).and_then(|params| start_ready_group(&params));
    match result {
        Ok(true) => {}
        Ok(false) => {
            warn!("Ready group did not complete in time");
            process::exit(1);
        }
        Err(e) => {
            cli_print_error_chain(&e, "readygroup");
            process::exit(1);
        }
    }
}
