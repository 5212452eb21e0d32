use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio_stream::StreamExt;
use tonic::transport::{Certificate, Channel, ClientTlsConfig};
use tonic::Status;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use remote_exec::config::{parse_users, LogConfig, ServerConfig, TlsConfig};
use remote_exec::grpc::GrpcServer;
use remote_exec::proto::remote_executor_client::RemoteExecutorClient;
use remote_exec::proto::{CmdRequest, GetRequest, JobDetails, JobStatus, StopRequest};
use remote_exec::shutdown::install_shutdown_handler;
use remote_exec::tls::TlsIdentity;

#[derive(Parser, Debug)]
#[command(name = "remote-exec")]
#[command(version)]
#[command(about = "Run commands on a remote server and stream their output")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the job server
    Server(ServerArgs),

    /// Job commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to listen on for gRPC
    #[arg(long, default_value = "127.0.0.1:8087")]
    listen: SocketAddr,

    /// Directory for job output chunks
    #[arg(long, default_value = "job-logs")]
    log_dir: PathBuf,

    /// Bytes of output kept in memory before a chunk is written to disk
    #[arg(long, default_value_t = remote_exec::config::DEFAULT_CHUNK_THRESHOLD)]
    chunk_size: usize,

    /// Live output blocks a reader may fall behind before it is disconnected
    #[arg(long, default_value = "256")]
    subscriber_buffer: usize,

    /// Users and permissions (comma-separated, format: "identity:read|write")
    /// Example: "alice@example.com:write,bob@example.com:read"
    #[arg(long, default_value = "")]
    users: String,

    // === TLS Options ===
    /// Enable mutual TLS
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate (PEM format)
    #[arg(long, requires = "tls")]
    ca_cert: Option<PathBuf>,

    /// Path to server certificate (PEM format)
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// Path to server private key (PEM format)
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,

    /// Allow running without TLS even when --tls is specified but certs are missing.
    /// Useful for development. NOT recommended for production.
    #[arg(long)]
    allow_insecure: bool,

    /// Identity assumed for callers without a client certificate (development only)
    #[arg(long)]
    insecure_identity: Option<String>,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address (use https:// for TLS)
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8087")]
    addr: String,

    /// Path to CA certificate (PEM format) for TLS
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (PEM format) for mTLS
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to client private key (PEM format) for mTLS
    #[arg(long)]
    key: Option<PathBuf>,

    /// Name expected in the server certificate
    #[arg(long, default_value = "localhost")]
    domain: String,

    /// Seconds to wait for connecting and for run/status/stop responses.
    /// Output streams are not limited.
    #[arg(long, default_value = "10", value_parser = parse_timeout)]
    timeout: Duration,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Run a command on the server
    Run {
        /// The command line to execute, e.g. "ls -la /tmp"
        command: String,

        /// Extra arguments appended after the split command line
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Get the status of a job
    Status {
        /// The job ID (UUID)
        job_id: String,
    },
    /// Print a job's output from the beginning and follow it
    Output {
        /// The job ID (UUID)
        job_id: String,
    },
    /// Stop a running job
    Stop {
        /// The job ID (UUID)
        job_id: String,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobDetailsOutput {
    job_id: String,
    status: String,
    exit_code: Option<i32>,
    created_at_ms: i64,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn job_status_to_string(status: i32) -> String {
    match JobStatus::try_from(status) {
        Ok(JobStatus::Running) => "RUNNING".to_string(),
        Ok(JobStatus::Completed) => "COMPLETED".to_string(),
        Ok(JobStatus::Errored) => "ERRORED".to_string(),
        Ok(JobStatus::Stopped) => "STOPPED".to_string(),
        _ => "UNKNOWN".to_string(),
    }
}

fn parse_timeout(secs: &str) -> Result<Duration, String> {
    let secs: u64 = secs
        .parse()
        .map_err(|e| format!("invalid timeout {secs:?}: {e}"))?;
    if secs == 0 {
        return Err("timeout must be at least one second".to_string());
    }
    Ok(Duration::from_secs(secs))
}

/// Reject malformed job ids before making a call.
fn parse_job_id(job_id: &str) -> Result<String, Box<dyn std::error::Error>> {
    let id = Uuid::parse_str(job_id).map_err(|e| format!("invalid job id {job_id:?}: {e}"))?;
    Ok(id.to_string())
}

/// Split a command line into program and arguments using shell quoting rules.
fn split_command_line(
    command: &str,
    extra_args: Vec<String>,
) -> Result<(String, Vec<String>), Box<dyn std::error::Error>> {
    let mut words = shell_words::split(command)?;
    words.extend(extra_args);
    if words.is_empty() {
        return Err("command cannot be empty".into());
    }
    let program = words.remove(0);
    Ok((program, words))
}

/// Bound a unary call by `timeout`, failing with `DEADLINE_EXCEEDED`.
async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Status::deadline_exceeded(format!("no response within {:?}", timeout)))?
}

async fn create_client_channel(args: &ClientArgs) -> Result<Channel, Box<dyn std::error::Error>> {
    let endpoint = Channel::from_shared(args.addr.clone())?.connect_timeout(args.timeout);

    if let (Some(_), Some(_), Some(_)) = (&args.ca_cert, &args.cert, &args.key) {
        let tls_config = TlsConfig {
            enabled: true,
            ca_cert_path: args.ca_cert.clone(),
            cert_path: args.cert.clone(),
            key_path: args.key.clone(),
            allow_insecure: false,
        };
        let identity = TlsIdentity::load(&tls_config).await?;
        let channel = endpoint
            .tls_config(identity.client_tls_config(&args.domain))?
            .connect()
            .await?;
        return Ok(channel);
    }

    if let Some(ca_path) = &args.ca_cert {
        // Server authentication only; the server will reject the call unless
        // it runs with an insecure identity
        let ca_cert = Certificate::from_pem(tokio::fs::read(ca_path).await?);
        let tls_config = ClientTlsConfig::new()
            .domain_name(args.domain.clone())
            .ca_certificate(ca_cert);
        return Ok(endpoint.tls_config(tls_config)?.connect().await?);
    }

    Ok(endpoint.connect().await?)
}

fn print_job_details(details: JobDetails, output_format: &OutputFormat) -> serde_json::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let output = JobDetailsOutput {
                job_id: details.job_id,
                status: job_status_to_string(details.status),
                exit_code: details.exit_code,
                created_at_ms: details.created_at_ms,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:    {}", details.job_id);
            println!("Status:    {}", job_status_to_string(details.status));
            if let Some(exit_code) = details.exit_code {
                println!("Exit Code: {}", exit_code);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let tls_config = TlsConfig {
        enabled: args.tls,
        ca_cert_path: args.ca_cert,
        cert_path: args.cert,
        key_path: args.key,
        allow_insecure: args.allow_insecure,
    };

    let tls_identity = if tls_config.is_complete() {
        match TlsIdentity::load(&tls_config).await {
            Ok(identity) => {
                tracing::info!("TLS enabled with mTLS authentication");
                Some(identity)
            }
            Err(e) => {
                if tls_config.allow_insecure {
                    tracing::warn!(
                        error = %e,
                        "TLS certificate loading failed, running in insecure mode"
                    );
                    None
                } else {
                    return Err(format!("TLS certificate loading failed: {}", e).into());
                }
            }
        }
    } else if tls_config.enabled {
        if tls_config.allow_insecure {
            tracing::warn!(
                "TLS enabled but certificate paths incomplete, running in insecure mode"
            );
            None
        } else {
            return Err("TLS enabled but missing required paths (--ca-cert, --cert, --key)".into());
        }
    } else {
        tracing::warn!("Running without TLS. Callers cannot be authenticated by certificate.");
        None
    };

    let config = ServerConfig {
        listen_addr: args.listen,
        log: LogConfig {
            dir: args.log_dir,
            chunk_threshold: args.chunk_size,
            subscriber_capacity: args.subscriber_buffer,
            ..LogConfig::default()
        },
        tls: tls_config,
        users: parse_users(&args.users)?,
        insecure_identity: args.insecure_identity,
    };

    if config.users.is_empty() {
        tracing::warn!("No users configured, every request will be denied");
    }

    let shutdown = install_shutdown_handler()?;
    GrpcServer::new(config, tls_identity).run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

/// A job subcommand with its arguments checked, ready to send.
#[derive(Debug, PartialEq)]
enum JobCall {
    Run { program: String, args: Vec<String> },
    Status(String),
    Output(String),
    Stop(String),
}

impl TryFrom<JobCommands> for JobCall {
    type Error = Box<dyn std::error::Error>;

    fn try_from(command: JobCommands) -> Result<Self, Self::Error> {
        Ok(match command {
            JobCommands::Run { command, args } => {
                let (program, args) = split_command_line(&command, args)?;
                JobCall::Run { program, args }
            }
            JobCommands::Status { job_id } => JobCall::Status(parse_job_id(&job_id)?),
            JobCommands::Output { job_id } => JobCall::Output(parse_job_id(&job_id)?),
            JobCommands::Stop { job_id } => JobCall::Stop(parse_job_id(&job_id)?),
        })
    }
}

async fn handle_job_run(
    client: &mut RemoteExecutorClient<Channel>,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = CmdRequest {
        command: program,
        arguments: args,
    };
    let details = with_deadline(timeout, client.exec_command(request))
        .await?
        .into_inner();

    print_job_details(details, output_format)?;
    Ok(())
}

async fn handle_job_status(
    client: &mut RemoteExecutorClient<Channel>,
    job_id: String,
    timeout: Duration,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let details = with_deadline(timeout, client.get_status(GetRequest { job_id }))
        .await?
        .into_inner();

    print_job_details(details, output_format)?;
    Ok(())
}

async fn handle_job_output(
    client: &mut RemoteExecutorClient<Channel>,
    job_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = client
        .get_output(GetRequest { job_id })
        .await?
        .into_inner();

    let mut stdout = std::io::stdout().lock();
    while let Some(block) = stream.next().await {
        let block = block?;
        stdout.write_all(&block.output)?;
        stdout.flush()?;
    }
    Ok(())
}

async fn handle_job_stop(
    client: &mut RemoteExecutorClient<Channel>,
    job_id: String,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = StopRequest {
        job_id: job_id.clone(),
    };
    with_deadline(timeout, client.stop_job(request)).await?;
    println!("Job {} stopped", job_id);
    Ok(())
}

async fn run_job_command(
    args: &ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    // Validate locally before touching the network
    let call = JobCall::try_from(command)?;

    let channel = create_client_channel(args).await?;
    let mut client = RemoteExecutorClient::new(channel);

    match call {
        JobCall::Run { program, args: argv } => {
            handle_job_run(&mut client, program, argv, args.timeout, &args.output).await
        }
        JobCall::Status(job_id) => {
            handle_job_status(&mut client, job_id, args.timeout, &args.output).await
        }
        JobCall::Output(job_id) => handle_job_output(&mut client, job_id).await,
        JobCall::Stop(job_id) => handle_job_stop(&mut client, job_id, args.timeout).await,
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            if let Err(e) = run_job_command(&client, command).await {
                match e.downcast_ref::<Status>() {
                    Some(status) => eprintln!("Error: {}", status.message()),
                    None => eprintln!("Error: {}", e),
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_args(argv: &[&str]) -> (ClientArgs, JobCommands) {
        let args = Args::try_parse_from(
            ["remote-exec", "job"].iter().chain(argv.iter()).copied(),
        )
        .unwrap();
        match args.command {
            Commands::Job { client, command } => (client, command),
            Commands::Server(_) => panic!("expected a job command"),
        }
    }

    #[test]
    fn split_plain_words() {
        let (program, args) = split_command_line("ls -la /tmp", Vec::new()).unwrap();
        assert_eq!(program, "ls");
        assert_eq!(args, vec!["-la", "/tmp"]);
    }

    #[test]
    fn split_keeps_quoted_groups() {
        let (program, args) =
            split_command_line(r#"sh -c "echo 'a b' && ls""#, Vec::new()).unwrap();
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["-c", "echo 'a b' && ls"]);
    }

    #[test]
    fn split_honours_escaped_space() {
        let (program, args) = split_command_line(r"touch my\ file", Vec::new()).unwrap();
        assert_eq!(program, "touch");
        assert_eq!(args, vec!["my file"]);
    }

    #[test]
    fn split_rejects_unterminated_quote() {
        assert!(split_command_line("echo 'oops", Vec::new()).is_err());
    }

    #[test]
    fn split_appends_trailing_args() {
        let (program, args) =
            split_command_line("grep -r", vec!["needle".to_string(), ".".to_string()]).unwrap();
        assert_eq!(program, "grep");
        assert_eq!(args, vec!["-r", "needle", "."]);
    }

    #[test]
    fn split_rejects_blank_command() {
        assert!(split_command_line("   ", Vec::new()).is_err());
    }

    #[test]
    fn timeout_defaults_to_ten_seconds() {
        let (client, _) = job_args(&["status", "x"]);
        assert_eq!(client.timeout, Duration::from_secs(10));

        let (client, _) = job_args(&["--timeout", "3", "status", "x"]);
        assert_eq!(client.timeout, Duration::from_secs(3));
    }

    #[test]
    fn timeout_must_be_positive() {
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[tokio::test]
    async fn deadline_fails_slow_calls() {
        let slow = std::future::pending::<Result<(), Status>>();
        let err = with_deadline(Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::DeadlineExceeded);

        let fast = async { Ok::<_, Status>(7) };
        assert_eq!(with_deadline(Duration::from_secs(1), fast).await.unwrap(), 7);
    }

    #[test]
    fn malformed_job_ids_are_rejected_locally() {
        for sub in ["status", "output", "stop"] {
            let (_, command) = job_args(&[sub, "not-a-uuid"]);
            assert!(JobCall::try_from(command).is_err(), "{sub} accepted a bad id");
        }

        let id = Uuid::new_v4().to_string();
        let (_, command) = job_args(&["stop", &id]);
        assert_eq!(JobCall::try_from(command).unwrap(), JobCall::Stop(id));
    }

    #[tokio::test]
    async fn bad_job_id_fails_without_connecting() {
        // Nothing listens here; validation must fail first
        let (client, command) = job_args(&["--addr", "http://127.0.0.1:1", "status", "nope"]);
        let err = run_job_command(&client, command).await.unwrap_err();
        assert!(err.to_string().contains("invalid job id"));
    }

    #[test]
    fn job_status_names() {
        assert_eq!(job_status_to_string(JobStatus::Errored as i32), "ERRORED");
        assert_eq!(job_status_to_string(0), "UNKNOWN");
    }
}
