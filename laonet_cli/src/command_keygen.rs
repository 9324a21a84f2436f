use laonet::Keyring;

pub fn command_keygen(_matches: &clap::ArgMatches) {
    let keys = laonet::generate_keypair();

    println!("secret-key: {}", hex::encode(keys.secret().to_bytes()));
    println!("public-key: {}", keys.public_key());
}
