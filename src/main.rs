mod colors;

use std::env;
use std::io::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use colors::*;
use ragstream::config::{
    Config, ENV_API_KEY, ENV_BASE_URL, ENV_MAX_RETRIES, ENV_TIMEOUT_MS,
};
use ragstream::logging::init_logging;
use ragstream::{Error, Form, RagClient, RequestDescriptor, SessionState, StreamEvent};

/// Parsed command line, after global flags are stripped.
enum Command {
    Get {
        path: String,
        query: Vec<(String, String)>,
    },
    Post {
        path: String,
        body: String,
    },
    Stream {
        path: String,
        body: String,
    },
    Upload {
        path: String,
        file: String,
        collection: String,
        metadata: Option<String>,
    },
    Config,
    ConfigInit {
        force: bool,
    },
    Help,
    Version,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "-d" || a == "--debug");
    let args: Vec<String> = args
        .into_iter()
        .filter(|a| a != "-d" && a != "--debug")
        .collect();

    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("{}Error:{} {}", RED, RESET, msg);
            eprintln!();
            eprintln!("  {}Run 'ragstream --help' for usage.{}", DIM, RESET);
            std::process::exit(2);
        }
    };

    match command {
        Command::Help => {
            print_help();
            return;
        }
        Command::Version => {
            println!("ragstream {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        _ => {}
    }

    let config = match Config::load() {
        Ok(config) => config.with_overrides(debug),
        Err(e) => {
            eprintln!("{}Config error:{} {}", RED, RESET, e);
            std::process::exit(1);
        }
    };

    init_logging(config.logging.debug);

    match command {
        Command::Config => {
            run_config_command(&config);
            return;
        }
        Command::ConfigInit { force } => {
            if let Err(e) = run_config_init(&config, &Config::path(), force) {
                eprintln!("{}Config error:{} {}", RED, RESET, e);
                std::process::exit(1);
            }
            return;
        }
        _ => {}
    }

    let client = RagClient::new(config.client.clone());
    let result = match command {
        Command::Get { path, query } => run_get(&client, path, query).await,
        Command::Post { path, body } => run_post(&client, path, &body).await,
        Command::Stream { path, body } => run_stream(&client, path, &body).await,
        Command::Upload {
            path,
            file,
            collection,
            metadata,
        } => run_upload(&client, path, &file, collection, metadata.as_deref()).await,
        Command::Config | Command::ConfigInit { .. } | Command::Help | Command::Version => Ok(()),
    };

    if let Err(e) = result {
        report_error(&e);
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    match command.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-V" | "--version" | "version" => Ok(Command::Version),
        "config" => match rest {
            [] => Ok(Command::Config),
            [init, flags @ ..] if init == "init" => match flags {
                [] => Ok(Command::ConfigInit { force: false }),
                [flag] if flag == "--force" => Ok(Command::ConfigInit { force: true }),
                _ => Err("config init only accepts --force".to_string()),
            },
            [other, ..] => Err(format!("Unknown config subcommand '{}'", other)),
        },
        "get" => {
            let mut path = None;
            let mut query = Vec::new();
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "-q" | "--query" => {
                        let pair = iter.next().ok_or("--query requires KEY=VALUE")?;
                        let (key, value) = pair
                            .split_once('=')
                            .ok_or_else(|| format!("Invalid query '{}', expected KEY=VALUE", pair))?;
                        query.push((key.to_string(), value.to_string()));
                    }
                    other if path.is_none() => path = Some(other.to_string()),
                    other => return Err(format!("Unexpected argument '{}'", other)),
                }
            }
            Ok(Command::Get {
                path: path.ok_or("get requires a PATH")?,
                query,
            })
        }
        "post" | "stream" => {
            let [path, body] = rest else {
                return Err(format!("{} requires PATH and JSON body", command));
            };
            let (path, body) = (path.clone(), body.clone());
            Ok(if command == "post" {
                Command::Post { path, body }
            } else {
                Command::Stream { path, body }
            })
        }
        "upload" => {
            let mut positional = Vec::new();
            let mut collection = None;
            let mut metadata = None;
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "-c" | "--collection" => {
                        collection = Some(iter.next().ok_or("--collection requires an ID")?.clone());
                    }
                    "-m" | "--metadata" => {
                        metadata = Some(iter.next().ok_or("--metadata requires JSON")?.clone());
                    }
                    _ => positional.push(arg.clone()),
                }
            }
            let [path, file] = positional.as_slice() else {
                return Err("upload requires PATH and FILE".to_string());
            };
            Ok(Command::Upload {
                path: path.clone(),
                file: file.clone(),
                collection: collection.ok_or("upload requires --collection <ID>")?,
                metadata,
            })
        }
        other => Err(format!("Unknown command '{}'", other)),
    }
}

fn parse_json(body: &str) -> Result<serde_json::Value, Error> {
    serde_json::from_str(body).map_err(|e| Error::invalid_request(format!("invalid JSON argument: {e}")))
}

async fn run_get(
    client: &RagClient,
    path: String,
    query: Vec<(String, String)>,
) -> Result<(), Error> {
    let descriptor = query
        .into_iter()
        .fold(RequestDescriptor::get(path), |d, (key, value)| d.query(key, value));
    let response: serde_json::Value = client.send(&descriptor).await?;
    print_json(&response);
    Ok(())
}

async fn run_post(client: &RagClient, path: String, body: &str) -> Result<(), Error> {
    let descriptor = RequestDescriptor::post(path).json_value(parse_json(body)?);
    let response: serde_json::Value = client.send(&descriptor).await?;
    print_json(&response);
    Ok(())
}

async fn run_upload(
    client: &RagClient,
    path: String,
    file: &str,
    collection: String,
    metadata: Option<&str>,
) -> Result<(), Error> {
    let metadata = metadata.map(parse_json).transpose()?;
    let data = tokio::fs::read(file)
        .await
        .map_err(|e| Error::invalid_request(format!("cannot read {}: {}", file, e)))?;
    let file_name = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string());

    debug!(file = %file_name, bytes = data.len(), collection = %collection, "Uploading");
    let form = Form::upload(file_name, data, collection, metadata.as_ref());
    let response: serde_json::Value = client
        .send_multipart(&RequestDescriptor::post(path).multipart(form))
        .await?;
    print_json(&response);
    Ok(())
}

async fn run_stream(client: &RagClient, path: String, body: &str) -> Result<(), Error> {
    let descriptor = RequestDescriptor::post(path).json_value(parse_json(body)?);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, closing stream");
            on_interrupt.cancel();
        }
    });

    let mut session = client.stream_with_cancel(&descriptor, cancel).await?;
    let mut stdout = std::io::stdout();
    let mut failure = None;

    while let Some(event) = session.next().await {
        match &event {
            StreamEvent::Delta { delta } => {
                if let Err(e) = write_delta(&mut stdout, delta) {
                    debug!(error = %e, "stdout closed, stopping stream");
                    session.cancel();
                    return Ok(());
                }
            }
            StreamEvent::Sources { sources } => {
                for source in sources {
                    let title = source
                        .title
                        .as_deref()
                        .or(source.document_id.as_deref())
                        .unwrap_or("untitled");
                    eprintln!("{}[source]{} {}", DIM, RESET, title);
                }
            }
            StreamEvent::ReasoningStep { step, description } => {
                eprintln!("{}[step {}]{} {}", DIM, step, RESET, description);
            }
            StreamEvent::SubQuery { query } => {
                eprintln!("{}[sub-query]{} {}", DIM, RESET, query);
            }
            StreamEvent::FollowUp { questions } => {
                println!();
                for question in questions {
                    eprintln!("{}[follow-up]{} {}", CYAN, RESET, question);
                }
            }
            StreamEvent::Usage { usage } => {
                eprintln!(
                    "{}[usage]{} prompt={} completion={} total={}",
                    DIM, RESET, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                );
            }
            StreamEvent::Media { media } => {
                for url in media.iter().filter_map(|m| m.url.as_deref()) {
                    eprintln!("{}[media]{} {}", DIM, RESET, url);
                }
            }
            StreamEvent::Done { .. } => println!(),
            StreamEvent::Error { message } => failure = Some(message.clone()),
        }
    }

    if let Some(session_id) = session.session_id() {
        eprintln!("{}session: {}{}", DIM, session_id, RESET);
    }

    match (failure, session.state()) {
        (Some(message), _) => Err(Error::network(message)),
        (None, SessionState::Ended) => {
            println!();
            eprintln!("{}Warning:{} stream ended without completion", YELLOW, RESET);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Write streamed text straight through; a closed pipe ends the stream.
fn write_delta(out: &mut impl Write, delta: &str) -> std::io::Result<()> {
    out.write_all(delta.as_bytes())?;
    out.flush()
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

fn report_error(e: &Error) {
    eprintln!("{}Request failed:{} {}", RED, RESET, e);
    if let Some(status) = e.status() {
        eprintln!("  {}HTTP status {}{}", DIM, status, RESET);
    }
    if let Some(suggestion) = e.suggestion() {
        eprintln!();
        eprintln!("  {}Tip:{} {}", YELLOW, RESET, suggestion);
    }
}

fn run_config_command(config: &Config) {
    println!();
    println!("{}{}ragstream configuration{}", BOLD, GREEN, RESET);
    println!();

    let config_path = Config::path();
    println!("{}Config file:{}", BOLD, RESET);
    if config_path.exists() {
        println!("  {}{}{}", CYAN, config_path.display(), RESET);
    } else {
        println!(
            "  {} {}(not created yet){}",
            config_path.display(),
            DIM,
            RESET
        );
    }
    println!();

    let client = &config.client;
    println!("{}Effective settings:{}", BOLD, RESET);
    println!();
    println!("  {}[client]{}", DIM, RESET);
    println!("    base_url = {}\"{}\"{}", CYAN, client.base_url, RESET);
    println!("    timeout_ms = {}{}{}", CYAN, client.timeout_ms, RESET);
    println!("    max_retries = {}{}{}", CYAN, client.max_retries, RESET);
    match client.masked_api_key() {
        Some(masked) => println!("    api_key = {}\"{}\"{}", CYAN, masked, RESET),
        None => println!("    api_key = {}(not set){}", DIM, RESET),
    }
    println!();
    println!("  {}[logging]{}", DIM, RESET);
    println!("    debug = {}{}{}", CYAN, config.logging.debug, RESET);
    println!();

    println!("{}Environment variables:{}", BOLD, RESET);
    let mut any = false;
    for name in [ENV_API_KEY, ENV_BASE_URL, ENV_TIMEOUT_MS, ENV_MAX_RETRIES] {
        if env::var(name).is_ok() {
            println!("  {}{}{} = {}(set){}", YELLOW, name, RESET, DIM, RESET);
            any = true;
        }
    }
    if !any {
        println!("  {}(none set){}", DIM, RESET);
    }
    println!();
}

/// Write the effective settings (file, environment and defaults merged) to `path`.
fn run_config_init(
    config: &Config,
    path: &Path,
    force: bool,
) -> Result<bool, ragstream::config::ConfigError> {
    if path.exists() && !force {
        println!(
            "{}Config file already exists:{} {} {}(use --force to overwrite){}",
            YELLOW,
            RESET,
            path.display(),
            DIM,
            RESET
        );
        return Ok(false);
    }

    config.save_to(path)?;
    println!("{}Wrote{} {}", GREEN, RESET, path.display());
    Ok(true)
}

fn print_help() {
    println!(
        r#"
{BOLD}ragstream{RESET} {DIM}{version}{RESET}
{DIM}Resilient client for RAG service APIs{RESET}

{BOLD}USAGE:{RESET}  {GREEN}ragstream{RESET} [OPTIONS] <COMMAND>

{BOLD}COMMANDS{RESET}
┌──────────────────────────────────┬───────────────────────────────────┐
│ {YELLOW}get{RESET} <PATH> [-q KEY=VALUE]...    │ GET a JSON resource               │
│ {YELLOW}post{RESET} <PATH> <JSON>              │ POST a JSON body                  │
│ {YELLOW}stream{RESET} <PATH> <JSON>            │ POST and print the event stream   │
│ {YELLOW}upload{RESET} <PATH> <FILE> -c <ID>    │ Upload a document (multipart)     │
│ {YELLOW}config{RESET}                          │ Show effective configuration      │
│ {YELLOW}config init{RESET} [--force]           │ Write settings to the config file │
└──────────────────────────────────┴───────────────────────────────────┘

{BOLD}OPTIONS{RESET}
┌──────────────────────┬──────────────────────────────────────┐
│ {YELLOW}-d{RESET}, {YELLOW}--debug{RESET}          │ Enable debug logging                 │
│ {YELLOW}-m{RESET}, {YELLOW}--metadata{RESET} <JSON> │ {DIM}upload:{RESET} Document metadata          │
│ {YELLOW}-h{RESET}, {YELLOW}--help{RESET}           │ Show this help message               │
│ {YELLOW}-V{RESET}, {YELLOW}--version{RESET}        │ Show version information             │
└──────────────────────┴──────────────────────────────────────┘

{BOLD}EXAMPLES{RESET}
  {GREEN}ragstream get /api/v1/collections -q limit=10{RESET}
  {GREEN}ragstream stream /api/v1/chat/stream '{{"query":"What changed?"}}'{RESET}
  {GREEN}ragstream upload /api/v1/documents notes.pdf -c col-1{RESET}

{DIM}Config: ~/.config/ragstream/config.toml
Env:    {ENV_API_KEY}, {ENV_BASE_URL}, {ENV_TIMEOUT_MS}, {ENV_MAX_RETRIES}{RESET}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_get_with_query() {
        let command = parse_args(&args(&["get", "/api/v1/documents", "-q", "limit=5"])).unwrap();
        match command {
            Command::Get { path, query } => {
                assert_eq!(path, "/api/v1/documents");
                assert_eq!(query, vec![("limit".to_string(), "5".to_string())]);
            }
            _ => panic!("Expected Get"),
        }
    }

    #[test]
    fn test_parse_upload() {
        let command = parse_args(&args(&[
            "upload",
            "/api/v1/documents",
            "notes.txt",
            "--collection",
            "col-1",
        ]))
        .unwrap();
        match command {
            Command::Upload {
                file,
                collection,
                metadata,
                ..
            } => {
                assert_eq!(file, "notes.txt");
                assert_eq!(collection, "col-1");
                assert!(metadata.is_none());
            }
            _ => panic!("Expected Upload"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["stream", "/api/v1/chat/stream"])).is_err());
        assert!(parse_args(&args(&["upload", "/p", "f.txt"])).is_err());
        assert!(parse_args(&args(&["get", "/p", "-q", "novalue"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn test_write_delta() {
        let mut out = Vec::new();
        write_delta(&mut out, "Hel").unwrap();
        write_delta(&mut out, "lo").unwrap();
        assert_eq!(out, b"Hello");

        let err = write_delta(&mut ClosedPipe, "Hello").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_parse_config_init() {
        assert!(matches!(parse_args(&args(&["config"])), Ok(Command::Config)));
        assert!(matches!(
            parse_args(&args(&["config", "init"])),
            Ok(Command::ConfigInit { force: false })
        ));
        assert!(matches!(
            parse_args(&args(&["config", "init", "--force"])),
            Ok(Command::ConfigInit { force: true })
        ));
        assert!(parse_args(&args(&["config", "wipe"])).is_err());
    }

    #[test]
    fn test_config_init_respects_existing_file() {
        let dir = std::env::temp_dir().join(format!("ragstream-init-{}", std::process::id()));
        let path = dir.join("config.toml");
        let config = Config {
            client: ragstream::ClientConfig::new("sk-init", "https://rag.example.com"),
            ..Config::default()
        };

        assert!(run_config_init(&config, &path, false).unwrap());
        assert_eq!(Config::load_from(path.clone()).unwrap().client, config.client);

        let other = Config::default();
        assert!(!run_config_init(&other, &path, false).unwrap());
        assert_eq!(Config::load_from(path.clone()).unwrap().client, config.client);

        assert!(run_config_init(&other, &path, true).unwrap());
        assert_eq!(Config::load_from(path.clone()).unwrap().client, other.client);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_no_args_shows_help() {
        assert!(matches!(parse_args(&[]), Ok(Command::Help)));
    }
}
