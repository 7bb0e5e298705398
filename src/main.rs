// Entry point for the tangle node CLI
use clap::Parser;
use log::{error, info, LevelFilter};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tangle_ledger::cli::menu;
use tangle_ledger::core::{tip_selection, Tangle, Transaction, TransactionInput, TransactionOutput};
use tangle_ledger::error::Result;
use tangle_ledger::wallet::{load_key_file, save_key_file, KeyPair};
use tangle_ledger::{Command, NetworkedTangle, Opt, PeerNetwork, GLOBAL_CONFIG};

/// Starting balance a founding node mints for its own account
const FOUNDER_GRANT: f64 = 1_000_000.0;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<()> {
    match command {
        Command::GenerateKeys { path } => {
            let pair = KeyPair::generate()?;
            save_key_file(&pair, &path)?;
            println!("Generated account {} into {path}", pair.account_hash());
        }
        Command::Start {
            connect,
            listen,
            key_file,
        } => {
            let listen_addr = listen.unwrap_or_else(|| GLOBAL_CONFIG.get_node_addr());
            let network = PeerNetwork::new(&listen_addr);
            let tangle = Arc::new(Tangle::new());
            let networked = NetworkedTangle::new(tangle.clone(), network.clone());

            // Load or generate the account this node acts as
            let keys = match key_file {
                Some(path) => {
                    let pair = load_key_file(&path)?;
                    println!("Loaded account stored in: {path}");
                    pair
                }
                None => {
                    let pair = KeyPair::generate()?;
                    println!("Generated new account");
                    pair
                }
            };
            info!("Acting as account {}", keys.account_hash());
            networked.set_key_pair(keys, false)?;

            let bound = network.awake()?;

            match connect {
                // Establish a fresh network: a throwaway owner account
                // receives effectively unbounded money in the genesis and
                // funds every peer that shows up
                None => {
                    let owner = KeyPair::generate()?;
                    let genesis_tx = Transaction::new(
                        Vec::new(),
                        Vec::new(),
                        vec![TransactionOutput::new(owner.public_key(), f64::MAX)],
                        0,
                    )?;
                    tangle.set_genesis(tangle_ledger::TransactionNode::new(genesis_tx, &[]));
                    networked.enable_faucet(owner.clone());

                    println!("Established a network on {bound}");

                    // Fund our own account so the node can transact at once
                    info!("Sending us {FOUNDER_GRANT} money!");
                    let grant = (|| -> Result<()> {
                        let personal = networked
                            .personal_keys()
                            .expect("Keys were installed just above");
                        let inputs = vec![TransactionInput::signed(&owner, FOUNDER_GRANT)?];
                        let outputs =
                            vec![TransactionOutput::new(personal.public_key(), FOUNDER_GRANT)];
                        let node = tip_selection::create_and_mine(&tangle, inputs, outputs, 1)?;
                        networked.add(node)?;
                        Ok(())
                    })();
                    if let Err(e) = grant {
                        error!("Failed to fund the founding account: {e}");
                    }
                }
                // Join an existing network: dial the peer, introduce our
                // key, then ask the network to vote on the genesis
                Some(addr) => {
                    println!("Attempting to connect to the network...");
                    if let Err(e) = network.connect(&addr) {
                        error!("Failed to connect to the network: {e}");
                        process::exit(2);
                    }

                    thread::sleep(Duration::from_millis(500));
                    network.send(&tangle_ledger::Message::PublicKeySyncRequest);
                    thread::sleep(Duration::from_millis(500));
                    println!("Connected to the network (listening on {bound})");

                    networked.begin_genesis_vote();
                }
            }

            menu::run(&networked)?;
            network.disconnect();
        }
    }
    Ok(())
}
