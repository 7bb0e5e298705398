use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "tangle-ledger")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "start", about = "Start a tangle node")]
    Start {
        #[arg(
            long,
            help = "Peer address to join; a new network is established when omitted"
        )]
        connect: Option<String>,
        #[arg(long, help = "Address to listen on (defaults to NODE_ADDRESS)")]
        listen: Option<String>,
        #[arg(long = "key-file", help = "Relative path to this account's key file")]
        key_file: Option<String>,
    },
    #[command(name = "generatekeys", about = "Generate a key file for a new account")]
    GenerateKeys {
        #[arg(help = "Path to write the key file to")]
        path: String,
    },
}
