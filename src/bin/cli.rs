//! EmberKV CLI
//!
//! Opens a data directory, runs one operation against it and exits through
//! the normal drain-then-dump shutdown.

use std::process;

use clap::{Parser, Subcommand};
use emberkv::{Config, EmberError, Engine, Selection, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// EmberKV CLI
#[derive(Parser, Debug)]
#[command(name = "emberkv")]
#[command(about = "Embeddable key-value store with background write-back")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./emberkv_data")]
    data_dir: String,

    /// Skip the snapshot written on exit
    #[arg(long)]
    no_dump: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a string value
    Set {
        key: String,
        value: String,
    },

    /// Get a string value
    Get {
        key: String,
    },

    /// Remove a string value
    Unset {
        key: String,
    },

    /// Prepend to a list
    Lpush {
        key: String,
        value: String,
    },

    /// Append to a list
    Rpush {
        key: String,
        value: String,
    },

    /// Print list entries in [start, end]
    Lrange {
        key: String,

        #[arg(allow_hyphen_values = true, default_value = "0")]
        start: i64,

        #[arg(allow_hyphen_values = true, default_value = "-1")]
        end: i64,
    },

    /// Remove list entries in [start, end]
    Lrem {
        key: String,

        #[arg(allow_hyphen_values = true)]
        start: i64,

        #[arg(allow_hyphen_values = true)]
        end: i64,
    },

    /// Overwrite one list entry (appends past the end)
    Lset {
        key: String,

        #[arg(allow_hyphen_values = true)]
        index: i64,

        value: String,
    },

    /// Print the length of a list
    Llen {
        key: String,
    },

    /// Delete a key of any type
    Del {
        key: String,
    },

    /// List every key in order
    Keys,

    /// Write a full snapshot now
    Dump,

    /// Print the hash and placement bucket of a key
    Hash {
        key: String,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,emberkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::debug!("EmberKV v{}", emberkv::VERSION);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .dump_on_exit(!args.no_dump)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            process::exit(1);
        }
    };

    let outcome = run(&engine, args.command);
    let closed = engine.close();

    let mut code = 0;
    if let Err(e) = outcome {
        eprintln!("error: {}", e);
        code = match e {
            EmberError::NotFound => 2,
            _ => 1,
        };
    }
    if let Err(e) = closed {
        tracing::error!("Failed to close engine: {}", e);
        code = 1;
    }
    process::exit(code);
}

fn run(engine: &Engine, command: Commands) -> emberkv::Result<()> {
    match command {
        Commands::Set { key, value } => {
            engine.string_insert(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Get { key } => {
            print_bytes(&engine.string_lookup(key.as_bytes())?);
        }
        Commands::Unset { key } => {
            print_bytes(&engine.string_remove(key.as_bytes())?);
        }
        Commands::Lpush { key, value } => {
            println!("{}", engine.list_lpush(key.as_bytes(), value.as_bytes())?);
        }
        Commands::Rpush { key, value } => {
            println!("{}", engine.list_rpush(key.as_bytes(), value.as_bytes())?);
        }
        Commands::Lrange { key, start, end } => {
            let selection = Selection::Range { start, end };
            for entry in engine.list_lookup(key.as_bytes(), &selection)? {
                print_bytes(&entry);
            }
        }
        Commands::Lrem { key, start, end } => {
            let selection = Selection::Range { start, end };
            println!("{}", engine.list_remove(key.as_bytes(), &selection)?);
        }
        Commands::Lset { key, index, value } => {
            match engine.list_set(key.as_bytes(), index, value.as_bytes())? {
                Some(previous) => print_bytes(&previous),
                None => println!("OK"),
            }
        }
        Commands::Llen { key } => {
            println!("{}", engine.list_length(key.as_bytes())?);
        }
        Commands::Del { key } => match engine.key_delete(key.as_bytes())? {
            Value::String(_) => println!("deleted string"),
            Value::List(list) => println!("deleted list ({} entries)", list.len()),
        },
        Commands::Keys => {
            for key in engine.keys() {
                print_bytes(&key);
            }
        }
        Commands::Dump => {
            let stats = engine.dump()?;
            println!("{} entries, {} bytes", stats.entries, stats.bytes);
        }
        Commands::Hash { key } => {
            println!(
                "{:016x} bucket {}",
                emberkv::hash::hash(key.as_bytes()),
                engine.bucket_of(key.as_bytes())
            );
        }
    }
    Ok(())
}

fn print_bytes(bytes: &[u8]) {
    println!("{}", String::from_utf8_lossy(bytes));
}
