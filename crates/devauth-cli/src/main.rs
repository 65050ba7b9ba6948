//! devauth CLI tools: in-process exchange simulation, configuration checks.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use devauth_common::{DevAuthConfig, OperationCode, UserType};
use devauth_core::iso::{IsoClientTask, IsoServerTask};
use devauth_core::pake::{PakeClientTask, PakeServerTask};
use devauth_core::{DispatchOutcome, ExchangeParams, IsoParams, Message, Task, TaskDispatcher};
use devauth_crypto::SecretBytes;

#[derive(Parser, Debug)]
#[command(name = "devauth")]
#[command(about = "devauth CLI tools")]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, env = "DEVAUTH_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a client and a server against each other in this process
    Simulate {
        #[arg(short, long, value_enum, default_value_t = Protocol::Pake)]
        protocol: Protocol,

        #[arg(short, long, value_enum, default_value_t = Operation::Bind)]
        operation: Operation,

        /// PIN for bind, shared auth key otherwise
        #[arg(long, env = "DEVAUTH_SECRET", default_value = "123456")]
        secret: String,

        /// Secret the server side uses, to simulate a mismatch
        #[arg(long)]
        server_secret: Option<String>,

        #[arg(long, default_value = "devauth-client")]
        client_id: String,

        #[arg(long, default_value = "devauth-server")]
        server_id: String,

        /// Session key length in bytes (defaults to the configured length)
        #[arg(long)]
        key_length: Option<usize>,
    },

    /// Print the effective configuration
    Config,

    /// Show version information
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Protocol {
    Iso,
    Pake,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Operation {
    Bind,
    Authenticate,
    Unbind,
}

impl From<Operation> for OperationCode {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Bind => OperationCode::Bind,
            Operation::Authenticate => OperationCode::Authenticate,
            Operation::Unbind => OperationCode::Unbind,
        }
    }
}

const REQUEST_ID: i64 = 1;
const MAX_HOPS: usize = 8;

fn load_config(path: Option<&PathBuf>) -> Result<DevAuthConfig> {
    match path {
        Some(path) => DevAuthConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(DevAuthConfig::default()),
    }
}

struct Side<'a> {
    own_id: &'a str,
    peer_id: &'a str,
    secret: &'a str,
}

fn exchange_params(dispatcher: &TaskDispatcher, op: OperationCode, side: &Side<'_>) -> ExchangeParams {
    let params = dispatcher.exchange_params(
        op,
        side.own_id.as_bytes(),
        SecretBytes::from_slice(side.secret.as_bytes()),
    );
    if op.requires_known_peer() {
        params.with_peer(side.peer_id.as_bytes())
    } else {
        params
    }
}

/// Each side's task is built from its own dispatcher's configuration.
fn build_tasks(
    protocol: Protocol,
    op: OperationCode,
    (client_side, client): (&TaskDispatcher, &Side<'_>),
    (server_side, server): (&TaskDispatcher, &Side<'_>),
) -> Result<(Task, Task)> {
    let client_params = exchange_params(client_side, op, client);
    let server_params = exchange_params(server_side, op, server);
    let tasks = match protocol {
        Protocol::Iso => (
            IsoClientTask::new(IsoParams::new(client_params, UserType::Controller))?.into(),
            IsoServerTask::new(IsoParams::new(server_params, UserType::Accessory))?.into(),
        ),
        Protocol::Pake => (
            PakeClientTask::new(client_side.pake_params(client_params)?)?.into(),
            PakeServerTask::new(server_side.pake_params(server_params)?)?.into(),
        ),
    };
    Ok(tasks)
}

fn fingerprint(key: &SecretBytes) -> String {
    let digest = Sha256::digest(key.expose());
    hex::encode(&digest[..8])
}

/// Relay messages between two dispatchers until both sides finish.
fn run_simulation(
    client_side: &TaskDispatcher,
    server_side: &TaskDispatcher,
    client: Task,
    server: Task,
) -> Result<(Option<SecretBytes>, Option<SecretBytes>)> {
    server_side.register(REQUEST_ID, server)?;

    let mut start = Message::new();
    start.add_int(
        devauth_common::field::KEY_LENGTH,
        i64::try_from(client_side.config().default_key_length)?,
    );

    let mut client_key = None;
    let mut server_key = None;
    let mut outcome = client_side.start(REQUEST_ID, client, &start);
    let mut to_server = true;

    for hop in 0..MAX_HOPS {
        let (sender, receiver) = if to_server {
            ("client", server_side)
        } else {
            ("server", client_side)
        };
        let outbound = match outcome {
            Ok(DispatchOutcome::Continue { outbound }) => outbound,
            Ok(DispatchOutcome::Finish {
                outbound,
                session_key,
            }) => {
                info!(hop, side = sender, "exchange finished");
                if to_server {
                    client_key = session_key;
                } else {
                    server_key = session_key;
                }
                outbound
            }
            Ok(DispatchOutcome::Ignored) => bail!("{sender} ignored a message it should act on"),
            Err(failure) => {
                if let Some(notice) = failure.outbound {
                    // Let the peer observe the abort before reporting it.
                    let peer = receiver.process_data(REQUEST_ID, &notice);
                    info!(hop, side = sender, peer_result = ?peer.err().map(|e| e.error), "error notice delivered");
                }
                return Err(anyhow!(failure.error).context(format!("{sender} side failed")));
            }
        };

        let Some(bytes) = outbound else {
            return Ok((client_key, server_key));
        };
        info!(hop, from = sender, len = bytes.len(), "relaying message");
        debug!(body = %String::from_utf8_lossy(&bytes));
        outcome = receiver.process_data(REQUEST_ID, &bytes);
        to_server = !to_server;
    }
    bail!("exchange did not finish within {MAX_HOPS} hops")
}

fn main() -> Result<()> {
    devauth_common::init_tracing();

    let args = Args::parse();
    let mut config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Simulate {
            protocol,
            operation,
            secret,
            server_secret,
            client_id,
            server_id,
            key_length,
        } => {
            let op = OperationCode::from(operation);
            if let Some(key_len) = key_length {
                config.default_key_length = key_len;
            }
            let key_len = config.default_key_length;
            let server_secret = server_secret.unwrap_or_else(|| secret.clone());
            let client = Side {
                own_id: &client_id,
                peer_id: &server_id,
                secret: &secret,
            };
            let server = Side {
                own_id: &server_id,
                peer_id: &client_id,
                secret: &server_secret,
            };

            println!("Simulating {protocol:?} {op:?} ({key_len}-byte key)...");
            let client_side = TaskDispatcher::new(config.clone());
            let server_side = TaskDispatcher::new(config);
            let (client_task, server_task) =
                build_tasks(protocol, op, (&client_side, &client), (&server_side, &server))?;
            let (client_key, server_key) =
                run_simulation(&client_side, &server_side, client_task, server_task)?;

            match (client_key, server_key) {
                (Some(c), Some(s)) => {
                    if c.expose() != s.expose() {
                        bail!("session keys differ");
                    }
                    println!("Session key established");
                    println!("Fingerprint: {}", fingerprint(&c));
                }
                (None, None) => println!("Exchange complete; session key consumed"),
                _ => bail!("only one side holds a session key"),
            }
        }
        Command::Config => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Version => {
            println!("devauth {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
