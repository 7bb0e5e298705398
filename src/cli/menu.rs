// The interactive node menu. Single-character commands drive the running
// node: query balances, create transactions, prune, save and load, and
// manage keys, all against the live networked tangle.

use crate::core::{pruning, tip_selection, TransactionInput, TransactionOutput};
use crate::error::Result;
use crate::network::{Message, NetworkedTangle};
use crate::wallet::{account_hash_of, load_key_file, save_key_file, KeyPair};
use rand::seq::SliceRandom;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Run the menu loop until `q` or end of input
pub fn run(networked: &Arc<NetworkedTangle>) -> Result<()> {
    println!("Press `h` for additional instruction");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let Some(command) = line.trim().chars().next() else {
            continue;
        };

        match command.to_ascii_lowercase() {
            'b' => balance(networked),
            'c' => print!("\x1B[2J\x1B[1;1H"),
            'd' => debug_dump(networked, &mut lines)?,
            'g' => generate_genesis(networked),
            'h' => help(),
            'k' => key_management(networked, &mut lines)?,
            'p' => {
                if networked.toggle_ping() {
                    println!("Started pinging transactions");
                } else {
                    println!("Stopped pinging transactions");
                }
            }
            's' => save_tangle(networked, &mut lines)?,
            'l' => load_tangle(networked, &mut lines)?,
            't' => create_transaction(networked, &mut lines)?,
            'w' => networked.network().send_to_self(Message::UpdateWeightsRequest),
            'q' => break,
            _ => {}
        }
    }
    Ok(())
}

fn prompt<B: BufRead>(lines: &mut io::Lines<B>, message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    match lines.next() {
        Some(line) => Ok(line?.trim().to_string()),
        None => Ok(String::new()),
    }
}

fn balance(networked: &Arc<NetworkedTangle>) {
    let Some(keys) = networked.personal_keys() else {
        println!("No personal keys loaded");
        return;
    };

    let account = keys.public_key_b64();
    let at = |threshold: f64| {
        networked
            .tangle()
            .query_balance(&account, threshold)
            .unwrap_or_else(|e| {
                println!("Balance query failed: {e}");
                0.0
            })
    };
    println!(
        "Our ({}) balance is: {}(0%) {}(50%) {}(95%)",
        keys.account_hash(),
        at(0.0),
        at(0.5),
        at(0.95)
    );
}

fn debug_dump<B: BufRead>(
    networked: &Arc<NetworkedTangle>,
    lines: &mut io::Lines<B>,
) -> Result<()> {
    networked.tangle().debug_dump();

    let hash = prompt(lines, "Enter transaction hash (blank = skip): ")?;
    if !hash.is_empty() {
        match networked.tangle().find(&hash) {
            Some(node) => node.get_transaction().debug_dump(),
            None => println!("No transaction with hash `{hash}`"),
        }
    }
    Ok(())
}

fn generate_genesis(networked: &Arc<NetworkedTangle>) {
    match pruning::prune(networked.tangle()) {
        Ok(()) => networked.tangle().get_genesis().get_transaction().debug_dump(),
        Err(e) => println!("Pruning failed: {e}"),
    }
}

fn help() {
    println!("Tangle operations:");
    println!("(b)alance - Query our current balance (also displays our address)");
    println!("(c)lear - Clear the screen");
    println!("(d)ebug - Display a debug output of the tangle and (optionally) a transaction");
    println!("(h)elp - Show this help message");
    println!("(g)enerate - Generate the latest common genesis and prune the tangle");
    println!("(k)ey management - Options to manage your keys");
    println!("(p)inging toggle - Toggle whether received value is forwarded onward");
    println!("(s)ave - Save the tangle to a file");
    println!("(l)oad - Load a tangle from a file");
    println!("(t)ransaction - Create a new transaction");
    println!("(w)eights - Manually start propagating weights through the tangle");
    println!("(q)uit - Shut the node down");
    println!();
    println!("Select an operation:");
}

fn key_management<B: BufRead>(
    networked: &Arc<NetworkedTangle>,
    lines: &mut io::Lines<B>,
) -> Result<()> {
    let choice = prompt(lines, "(l)oad, (s)ave, (g)enerate: ")?;
    match choice.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('g') => {
            let pair = KeyPair::generate()?;
            println!("Generated account {}", pair.account_hash());
            networked.set_key_pair(pair, true)?;
        }
        Some('s') => {
            let path = prompt(lines, "Relative path: ")?;
            let Some(keys) = networked.personal_keys() else {
                println!("No personal keys to save");
                return Ok(());
            };
            match save_key_file(&keys, &path) {
                Ok(()) => println!("Keys saved to {path}"),
                Err(e) => println!("Invalid path `{path}`: {e}"),
            }
        }
        Some('l') => {
            let path = prompt(lines, "Relative path: ")?;
            match load_key_file(&path) {
                Ok(pair) => {
                    println!("Loaded account {}", pair.account_hash());
                    networked.set_key_pair(pair, true)?;
                }
                Err(e) => println!("Invalid path `{path}`: {e}"),
            }
        }
        _ => println!("Unknown key operation"),
    }
    Ok(())
}

fn save_tangle<B: BufRead>(
    networked: &Arc<NetworkedTangle>,
    lines: &mut io::Lines<B>,
) -> Result<()> {
    let path = prompt(lines, "Enter relative path to save tangle to: ")?;
    match File::create(&path) {
        Ok(mut file) => match networked.save_to(&mut file) {
            Ok(()) => println!("Tangle saved to {path}"),
            Err(e) => println!("Failed to save tangle: {e}"),
        },
        Err(e) => println!("Invalid path `{path}`: {e}"),
    }
    Ok(())
}

fn load_tangle<B: BufRead>(
    networked: &Arc<NetworkedTangle>,
    lines: &mut io::Lines<B>,
) -> Result<()> {
    let path = prompt(lines, "Enter relative path to load tangle from: ")?;
    match File::open(&path) {
        Ok(mut file) => match networked.load_from(&mut file) {
            Ok(()) => println!("Successfully loaded tangle from {path}"),
            Err(e) => println!("Failed to load tangle: {e}"),
        },
        Err(e) => println!("Invalid path `{path}`: {e}"),
    }
    Ok(())
}

fn create_transaction<B: BufRead>(
    networked: &Arc<NetworkedTangle>,
    lines: &mut io::Lines<B>,
) -> Result<()> {
    let Some(keys) = networked.personal_keys() else {
        println!("No personal keys loaded");
        return Ok(());
    };

    let mut account_hash = prompt(lines, "Enter account to transfer to ('r' for random): ")?;
    let amount: f64 = prompt(lines, "Enter amount to transfer: ")?
        .parse()
        .unwrap_or(0.0);
    let difficulty: u8 = prompt(lines, "Select mining difficulty (1-5): ")?
        .parse()
        .map(|d: u8| d.clamp(1, 5))
        .unwrap_or(3);

    // A random recipient comes from the connected peers; fall back to
    // ourselves when nobody else is known
    if account_hash == "r" {
        let peers = networked.network().peers();
        account_hash = peers
            .choose(&mut rand::thread_rng())
            .and_then(|peer| networked.peer_account(*peer))
            .map(|key| account_hash_of(&key))
            .unwrap_or_else(|| keys.account_hash());
    }

    let result = (|| -> Result<()> {
        let account = networked.find_account(&account_hash)?;
        let inputs = vec![TransactionInput::signed(&keys, amount)?];
        let outputs = vec![TransactionOutput::new(&account, amount)];

        println!("Sending {amount} money to {account_hash}");
        let node = tip_selection::create_and_mine(networked.tangle(), inputs, outputs, difficulty)?;
        networked.add(node)?;
        Ok(())
    })();
    if let Err(e) = result {
        println!("{e} Discarding transaction!");
    }
    Ok(())
}
