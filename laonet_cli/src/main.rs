use clap::{App, AppSettings, Arg, SubCommand};
use laonet::{Config, KeyPair};
use tracing_subscriber::EnvFilter;

mod command_election;
mod command_keygen;
mod command_lao;
mod command_listen;
mod command_replay;
mod command_verify;
mod command_vote;
mod net;

use command_election::command_election;
use command_keygen::command_keygen;
use command_lao::command_lao;
use command_listen::command_listen;
use command_replay::command_replay;
use command_verify::command_verify;
use command_vote::command_vote;

fn main() {
    let post = Arg::with_name("post")
        .long("post")
        .help("Publish the message to the server instead of only printing it");

    let matches = App::new("LAO network CLI")
        .version("0.1")
        .about("Creates, publishes and verifies LAO network messages")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("server")
                .long("server")
                .takes_value(true)
                .help(
                    "Server address, ws://host:port/path or host:port for line-framed TCP \
                     - can also be set with LAONET_SERVER_ADDRESS",
                ),
        )
        .arg(
            Arg::with_name("secret-key")
                .long("secret-key")
                .takes_value(true)
                .help("Hex encoded secret key - can also be set with LAONET_SECRET_KEY"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(SubCommand::with_name("keygen").about("Generate a new keypair"))
        .subcommand(
            SubCommand::with_name("lao")
                .about("Manage LAOs")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("create")
                        .about("Create a LAO organized by the secret key's owner")
                        .arg(Arg::with_name("NAME").index(1).required(true))
                        .arg(
                            Arg::with_name("witness")
                                .long("witness")
                                .takes_value(true)
                                .multiple(true)
                                .number_of_values(1)
                                .help("Public key of a witness (base64url)"),
                        )
                        .arg(post.clone()),
                ),
        )
        .subcommand(
            SubCommand::with_name("election")
                .about("Manage elections")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("setup")
                        .about("Set up an election with a single plurality question")
                        .arg(Arg::with_name("LAO-ID").index(1).required(true))
                        .arg(Arg::with_name("NAME").index(2).required(true))
                        .arg(Arg::with_name("QUESTION").index(3).required(true))
                        .arg(
                            Arg::with_name("OPTIONS")
                                .index(4)
                                .required(true)
                                .multiple(true)
                                .help("Ballot options"),
                        )
                        .arg(
                            Arg::with_name("duration")
                                .long("duration")
                                .takes_value(true)
                                .help("How long the election runs, in seconds (default 86400)"),
                        )
                        .arg(
                            Arg::with_name("secret-ballot")
                                .long("secret-ballot")
                                .help("Votes are encrypted under an election key"),
                        )
                        .arg(post.clone()),
                )
                .subcommand(
                    SubCommand::with_name("open")
                        .about("Open an election")
                        .arg(Arg::with_name("LAO-ID").index(1).required(true))
                        .arg(Arg::with_name("ELECTION-ID").index(2).required(true))
                        .arg(post.clone()),
                )
                .subcommand(
                    SubCommand::with_name("end")
                        .about("End an election")
                        .arg(Arg::with_name("LAO-ID").index(1).required(true))
                        .arg(Arg::with_name("ELECTION-ID").index(2).required(true))
                        .arg(
                            Arg::with_name("REGISTERED-VOTES")
                                .index(3)
                                .required(true)
                                .help("Hash of the registered vote ids, as printed by replay"),
                        )
                        .arg(post.clone()),
                ),
        )
        .subcommand(
            SubCommand::with_name("vote")
                .about("Cast a vote")
                .arg(Arg::with_name("LAO-ID").index(1).required(true))
                .arg(Arg::with_name("ELECTION-ID").index(2).required(true))
                .arg(Arg::with_name("QUESTION-ID").index(3).required(true))
                .arg(
                    Arg::with_name("OPTION")
                        .index(4)
                        .required(true)
                        .help("Index of the chosen ballot option"),
                )
                .arg(
                    Arg::with_name("election-key")
                        .long("election-key")
                        .takes_value(true)
                        .help("Encrypt the vote under this election key (secret ballot)"),
                )
                .arg(post),
        )
        .subcommand(
            SubCommand::with_name("verify")
                .about("Verify signed messages")
                .arg(
                    Arg::with_name("INPUT")
                        .index(1)
                        .required(true)
                        .help("File holding one message or a JSON array of messages"),
                ),
        )
        .subcommand(
            SubCommand::with_name("replay")
                .about("Apply a channel history and print the resulting state")
                .arg(
                    Arg::with_name("INPUT")
                        .index(1)
                        .required(true)
                        .help("JSON array of {channel, message} entries"),
                )
                .arg(
                    Arg::with_name("print-tally")
                        .long("print-tally")
                        .help("Tally closed elections"),
                ),
        )
        .subcommand(
            SubCommand::with_name("listen")
                .about("Join channels and print state changes until interrupted")
                .arg(
                    Arg::with_name("CHANNELS")
                        .index(1)
                        .multiple(true)
                        .help("Channels to join (default /root)"),
                ),
        )
        .get_matches();

    let level = match matches.occurrences_of("v") {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("laonet: {}", e);
        std::process::exit(1);
    });
    if let Some(server) = matches.value_of("server") {
        config.server_address = expand(server);
    }
    tracing::debug!(server = %config.server_address, "cli: configured");

    let env_key = std::env::var("LAONET_SECRET_KEY").ok();
    let secret_key = matches
        .value_of("secret-key")
        .map(expand)
        .or(env_key)
        .map(|hex_key| {
            let bytes = hex::decode(hex_key.trim()).unwrap_or_else(|e| {
                eprintln!("laonet: secret key is not valid hex: {}", e);
                std::process::exit(1);
            });
            KeyPair::from_secret_bytes(&bytes).unwrap_or_else(|e| {
                eprintln!("laonet: invalid secret key: {}", e);
                std::process::exit(1);
            })
        });

    // Subcommands
    match matches.subcommand() {
        ("keygen", Some(matches)) => command_keygen(matches),
        ("lao", Some(matches)) => command_lao(matches, &config, secret_key.as_ref()),
        ("election", Some(matches)) => command_election(matches, &config, secret_key.as_ref()),
        ("vote", Some(matches)) => command_vote(matches, &config, secret_key.as_ref()),
        ("verify", Some(matches)) => command_verify(matches),
        ("replay", Some(matches)) => command_replay(matches),
        ("listen", Some(matches)) => command_listen(matches, &config),
        _ => {}
    }
}

/// Expand `~` and environment variables in an argument
pub fn expand(input: &str) -> String {
    shellexpand::full(input)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| input.to_owned())
}

/// Exit unless a secret key was given
pub fn require_key<'a>(secret_key: Option<&'a KeyPair>) -> &'a KeyPair {
    secret_key.unwrap_or_else(|| {
        eprintln!("Please provide a secret key either via --secret-key or LAONET_SECRET_KEY");
        std::process::exit(1);
    })
}

/// Current time in seconds since the epoch
pub fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parse an argument or exit with a message naming it
pub fn parse_arg<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> T
where
    T::Err: std::fmt::Display,
{
    let raw = matches.value_of(name).map(expand).unwrap_or_default();
    raw.parse().unwrap_or_else(|e| {
        eprintln!("laonet: invalid {}: {}", name, e);
        std::process::exit(1);
    })
}
