use super::{expand, now, parse_arg, require_key};
use crate::net::emit;
use laonet::*;

pub fn command_election(matches: &clap::ArgMatches, config: &Config, secret_key: Option<&KeyPair>) {
    let keys = require_key(secret_key);

    // Subcommands
    match matches.subcommand() {
        ("setup", Some(matches)) => command_election_setup(matches, config, keys),
        ("open", Some(matches)) => command_election_open(matches, config, keys),
        ("end", Some(matches)) => command_election_end(matches, config, keys),
        _ => {}
    }
}

pub fn command_election_setup(matches: &clap::ArgMatches, config: &Config, keys: &KeyPair) {
    let lao_id: Identifier = parse_arg(matches, "LAO-ID");
    let name = matches.value_of("NAME").map(expand).unwrap_or_default();
    let question = matches.value_of("QUESTION").map(expand).unwrap_or_default();
    let options: Vec<String> = matches
        .values_of("OPTIONS")
        .map(|values| values.map(expand).collect())
        .unwrap_or_default();
    let options: Vec<&str> = options.iter().map(String::as_str).collect();

    let duration: i64 = match matches.value_of("duration") {
        Some(_) => parse_arg(matches, "duration"),
        None => 86_400,
    };
    let version = if matches.is_present("secret-ballot") {
        ElectionVersion::SecretBallot
    } else {
        ElectionVersion::OpenBallot
    };

    let creation = now();
    let election = Election::setup(
        &lao_id,
        &name,
        version,
        vec![QuestionSpec::plurality(&question, &options)],
        creation,
        creation,
        creation + duration,
    )
    .unwrap_or_else(|e| {
        eprintln!("laonet election setup: {}", e);
        std::process::exit(1);
    });

    eprintln!("> Election id: {}", election.id);
    for question in &election.questions {
        eprintln!("> Question id: {}", question.id);
    }

    emit(
        config,
        keys,
        &Channel::lao(&lao_id),
        election.to_setup_data().into(),
        matches.is_present("post"),
    );
}

pub fn command_election_open(matches: &clap::ArgMatches, config: &Config, keys: &KeyPair) {
    let lao: Identifier = parse_arg(matches, "LAO-ID");
    let election: Identifier = parse_arg(matches, "ELECTION-ID");
    let channel = Channel::election(&lao, &election);

    let data = OpenElection {
        lao,
        election,
        opened_at: now(),
    };
    emit(config, keys, &channel, data.into(), matches.is_present("post"));
}

pub fn command_election_end(matches: &clap::ArgMatches, config: &Config, keys: &KeyPair) {
    let lao: Identifier = parse_arg(matches, "LAO-ID");
    let election: Identifier = parse_arg(matches, "ELECTION-ID");
    let registered_votes: Identifier = parse_arg(matches, "REGISTERED-VOTES");
    let channel = Channel::election(&lao, &election);

    let data = EndElection {
        lao,
        election,
        created_at: now(),
        registered_votes,
    };
    emit(config, keys, &channel, data.into(), matches.is_present("post"));
}
