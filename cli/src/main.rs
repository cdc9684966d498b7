use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use client::{
    Buffer, Client, ClientError, ClientOptions, Encoding, InvokeOptions, MessageScope, PublishOptions, ServiceRequest,
    TopicMessage, WsConnection, service_fn,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to read {path}: {source}")]
    Input { path: String, source: io::Error },
    #[error("failed to wait for ctrl-c: {0}")]
    Signal(io::Error),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "broker-cli", about = "Publish, subscribe and invoke services on a message broker")]
struct Cli {
    #[arg(long, env = "BROKER_URL", default_value = client::config::DEFAULT_URL)]
    url: String,

    #[arg(long, env = "BROKER_ACCESS_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "BROKER_CONNECT_TIMEOUT_SECS", default_value_t = client::config::DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    #[arg(long, env = "BROKER_INVOKE_TIMEOUT_SECS", default_value_t = client::config::DEFAULT_INVOKE_TIMEOUT_SECS)]
    invoke_timeout_secs: u64,

    #[arg(long, default_value_t = false, help = "Use protobuf binary frames instead of JSON text")]
    binary: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print the assigned client id.
    Ping,
    /// Publish one payload, or each non-empty line of --input.
    Publish(PublishArgs),
    /// Print updates as JSON lines until ctrl-c or --count.
    Subscribe(SubscribeArgs),
    /// Call an endpoint and print the response payload.
    Invoke(InvokeArgs),
    /// Register an endpoint that answers every call with its own payload.
    ServeEcho {
        endpoint: String,
    },
}

#[derive(Args, Debug)]
struct PublishArgs {
    topic: String,

    #[arg(help = "Payload to publish; omit to publish each line of --input")]
    payload: Option<String>,

    #[arg(long, default_value = "-", help = "Input file path, or - for stdin")]
    input: String,

    #[arg(long, help = "Deliver only to this client id")]
    to: Option<String>,

    #[arg(long)]
    correlation_id: Option<String>,
}

#[derive(Args, Debug)]
struct SubscribeArgs {
    #[arg(required = true)]
    topics: Vec<String>,

    #[arg(long, help = "Exit after this many updates")]
    count: Option<usize>,
}

#[derive(Args, Debug)]
struct InvokeArgs {
    endpoint: String,

    payload: Option<String>,

    #[arg(long, help = "Invoke this client id directly")]
    to: Option<String>,

    #[arg(long, help = "Overrides --invoke-timeout-secs for this call")]
    timeout_secs: Option<u64>,
}

impl Cli {
    fn options(&self) -> ClientOptions {
        ClientOptions {
            url: self.url.clone(),
            access_token: self.token.clone().filter(|t| !t.is_empty()),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            invoke_timeout: Duration::from_secs(self.invoke_timeout_secs),
        }
    }

    fn encoding(&self) -> Encoding {
        if self.binary { Encoding::Protobuf } else { Encoding::Json }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let options = cli.options();
    let client = Client::new(WsConnection::new(options.url.clone(), cli.encoding()), options);

    let result = match cli.command {
        Command::Ping => run_ping(&client).await,
        Command::Publish(args) => run_publish(&client, args).await,
        Command::Subscribe(args) => run_subscribe(&client, args).await,
        Command::Invoke(args) => run_invoke(&client, args).await,
        Command::ServeEcho { endpoint } => run_serve_echo(&client, &endpoint).await,
    };
    client.close().await;
    result
}

async fn run_ping(client: &Client) -> Result<(), CliError> {
    let client_id = client.connect().await?;
    println!("{client_id}");
    Ok(())
}

async fn run_publish(client: &Client, args: PublishArgs) -> Result<(), CliError> {
    let options = PublishOptions { scope: scope_for(args.to.as_deref()), correlation_id: args.correlation_id };

    if let Some(payload) = args.payload {
        client.publish_with(&args.topic, Some(payload.into()), options).await?;
        return Ok(());
    }

    let read_error = |source| CliError::Input { path: args.input.clone(), source };
    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(&args.input).map_err(read_error)?))
    };

    let mut sent = 0_usize;
    for line in reader.lines() {
        let line = line.map_err(read_error)?;
        if line.trim().is_empty() {
            continue;
        }
        client.publish_with(&args.topic, Some(line.into()), options.clone()).await?;
        sent = sent.saturating_add(1);
    }
    eprintln!("published {sent} message(s) to {}", args.topic);
    Ok(())
}

async fn run_subscribe(client: &Client, args: SubscribeArgs) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriptions = Vec::with_capacity(args.topics.len());
    for topic in &args.topics {
        subscriptions.push(client.subscribe(topic, tx.clone()).await?);
    }
    drop(tx);
    info!(topics = ?args.topics, "subscribed");

    let mut seen = 0_usize;
    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else {
                    break;
                };
                println!("{}", render_update(&update)?);
                seen = seen.saturating_add(1);
                if args.count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(CliError::Signal)?;
                break;
            }
        }
    }

    drop(subscriptions);
    Ok(())
}

async fn run_invoke(client: &Client, args: InvokeArgs) -> Result<(), CliError> {
    let options = InvokeOptions {
        timeout: args.timeout_secs.map(Duration::from_secs),
        scope: scope_for(args.to.as_deref()),
        ..InvokeOptions::default()
    };
    let reply = client.invoke_with(&args.endpoint, args.payload.map(Buffer::from), options).await?;
    if let Some(payload) = reply {
        println!("{}", String::from_utf8_lossy(payload.as_bytes()));
    }
    Ok(())
}

async fn run_serve_echo(client: &Client, endpoint: &str) -> Result<(), CliError> {
    let echo = service_fn(|req: ServiceRequest| async move {
        info!(endpoint = %req.endpoint, source_id = ?req.source_id, "echo");
        Ok(req.payload)
    });
    client.register_service(endpoint, echo).await?;
    let client_id = client.connect().await?;
    eprintln!("serving {endpoint} as {client_id}; ctrl-c to stop");

    tokio::signal::ctrl_c().await.map_err(CliError::Signal)?;
    Ok(())
}

fn scope_for(target: Option<&str>) -> MessageScope {
    target.map_or(MessageScope::Default, MessageScope::client)
}

fn render_update(update: &TopicMessage) -> Result<String, CliError> {
    let payload = update.payload.as_ref().map(|p| String::from_utf8_lossy(p.as_bytes()).into_owned());
    let value = json!({
        "topic": update.topic.as_str(),
        "sourceId": update.source_id,
        "correlationId": update.correlation_id,
        "payload": payload,
    });
    Ok(serde_json::to_string(&value)?)
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
