use super::{expand, now, require_key};
use crate::net::emit;
use laonet::{Channel, Config, CreateLao, KeyPair, Keyring, PublicKey};

pub fn command_lao(matches: &clap::ArgMatches, config: &Config, secret_key: Option<&KeyPair>) {
    // Subcommands
    if let Some(matches) = matches.subcommand_matches("create") {
        command_lao_create(matches, config, require_key(secret_key));
    }
}

pub fn command_lao_create(matches: &clap::ArgMatches, config: &Config, keys: &KeyPair) {
    let name = matches.value_of("NAME").map(expand).unwrap_or_default();

    let witnesses: Vec<PublicKey> = matches
        .values_of("witness")
        .map(|values| values.collect())
        .unwrap_or_else(Vec::new)
        .into_iter()
        .map(|raw| {
            raw.parse().unwrap_or_else(|e| {
                eprintln!("laonet lao create: invalid witness {}: {}", raw, e);
                std::process::exit(1);
            })
        })
        .collect();

    let data = CreateLao::new(keys.public_key(), &name, now(), witnesses);
    eprintln!("> LAO id: {}", data.id);

    emit(config, keys, &Channel::root(), data.into(), matches.is_present("post"));
}
