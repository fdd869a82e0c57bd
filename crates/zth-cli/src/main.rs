//! ZeroToHire CLI
//!
//! Line-oriented terminal client for the AI tutor.

mod command;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use command::{Command, HELP};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;
use zth_client::{
    Applied, Config, ConnectionEvent, Dispatch, ProblemQuery, Role, Session, SessionState,
};

/// ZeroToHire - practice coding problems with an AI tutor
#[derive(Parser, Debug)]
#[command(name = "zth")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: zth.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Base URL of the backend API
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// URL of the streaming endpoint
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Directory for the local code cache and credentials
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<String>,

    /// Always use plain HTTP requests instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("ZeroToHire client starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref url) = args.api_url {
        config.api_base_url.clone_from(url);
    }
    if let Some(ref url) = args.ws_url {
        config.ws_url.clone_from(url);
    }
    if let Some(ref dir) = args.data_dir {
        config.data_dir.clone_from(dir);
    }
    if args.no_stream {
        config.streaming = false;
    }

    config.validate()?;
    print_config(&config);

    let mut session = Session::open(&config)?;
    session.connect();

    if let Err(e) = session.load_status().await {
        tracing::warn!(error = %e, "Could not load session status");
        println!("Backend unavailable: {e}");
    } else {
        print_conversation(session.state());
    }

    println!();
    println!("Type a message to chat, or /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut renderer = StreamRenderer::default();

    loop {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
            event = session.next_connection_event() => {
                let Some(event) = event else { continue };
                let applied = session.handle_connection_event(event.clone()).await;
                renderer.render(&event, applied.as_ref(), session.state());
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        execute(&mut session, command, &mut lines, &mut renderer).await?;
                    }
                    Err(usage) => println!("{usage}"),
                }
            }
        }
    }

    session.shutdown();
    println!("Goodbye");
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

#[allow(clippy::too_many_lines)]
async fn execute(
    session: &mut Session,
    command: Command,
    lines: &mut Lines<BufReader<Stdin>>,
    renderer: &mut StreamRenderer,
) -> anyhow::Result<()> {
    // Failures are already folded into the session state; report and go on.
    let outcome: zth_client::Result<()> = match command {
        Command::Chat(text) => match session.send_message(&text).await {
            Ok(Dispatch::Socket) => {
                renderer.begin_turn();
                Ok(())
            }
            Ok(Dispatch::Http) => {
                print_last_reply(session.state());
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Login { username, password } => {
            session.login(&username, &password).await.map(|user| {
                println!("Logged in as {}", user.username);
            })
        }
        Command::Register {
            username,
            email,
            password,
        } => session
            .register(&username, &email, &password)
            .await
            .map(|user| println!("Welcome, {}", user.username)),
        Command::Logout => {
            session.logout();
            println!("Logged out");
            Ok(())
        }
        Command::Profile => session.profile().await.map(|user| {
            println!("Username: {}", user.username);
            if let Some(email) = user.email {
                println!("Email: {email}");
            }
        }),
        Command::Problems { search } => {
            let query = ProblemQuery {
                search,
                ..ProblemQuery::default()
            };
            session.problems(&query).await.map(|page| {
                for problem in &page.problems {
                    let mark = if problem.completed { "x" } else { " " };
                    println!(
                        "[{mark}] {:>4}  {:<8} {}",
                        problem.id, problem.difficulty, problem.title
                    );
                }
                println!(
                    "Page {} ({} of {} problems{})",
                    page.page,
                    page.problems.len(),
                    page.total,
                    if page.has_more { ", more available" } else { "" }
                );
            })
        }
        Command::Problem(id) => session.select_problem(id).await.map(|()| {
            print_problem(session.state());
            print_conversation(session.state());
        }),
        Command::Completion(completed) => session.set_completion(completed).await.map(|()| {
            println!(
                "Marked as {}",
                if completed { "completed" } else { "not completed" }
            );
        }),
        Command::Code(path) => match tokio::fs::read_to_string(&path).await {
            Ok(code) => {
                session.edit_code(code);
                println!("Loaded {path} into the code buffer");
                Ok(())
            }
            Err(e) => {
                println!("Cannot read {path}: {e}");
                Ok(())
            }
        },
        Command::ShowCode => {
            println!("{}", session.state().code);
            Ok(())
        }
        Command::Save => session.save_code().await.map(|saved| {
            println!("{}", if saved { "Saved" } else { "Nothing to save" });
        }),
        Command::Evaluate => session
            .evaluate_code()
            .await
            .map(|()| print_last_reply(session.state())),
        Command::Reset => match session.request_reset() {
            Ok(confirmation) => {
                println!(
                    "Reset problem {}? Code and conversation will be lost. Type 'yes' to confirm:",
                    confirmation.problem_id()
                );
                let answer = lines.next_line().await?.unwrap_or_default();
                if answer.trim().eq_ignore_ascii_case("yes") {
                    session
                        .reset_problem(confirmation)
                        .await
                        .map(|()| println!("Problem reset"))
                } else {
                    println!("Reset cancelled");
                    Ok(())
                }
            }
            Err(e) => Err(e),
        },
        Command::Clear => session
            .clear_session()
            .await
            .map(|()| println!("Session cleared")),
        Command::Dismiss => {
            session.dismiss_error();
            Ok(())
        }
        Command::Status => {
            print_status(&session.snapshot());
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = outcome {
        tracing::debug!(kind = %e.kind(), "Command failed");
        println!("{e}");
    }
    Ok(())
}

/// Prints streamed tutor text as it arrives.
#[derive(Debug, Default)]
struct StreamRenderer {
    printed: usize,
    streamed: bool,
}

impl StreamRenderer {
    fn begin_turn(&mut self) {
        self.printed = 0;
        self.streamed = false;
    }

    fn render(&mut self, event: &ConnectionEvent, applied: Option<&Applied>, state: &SessionState) {
        use std::io::Write;

        match (event, applied) {
            (ConnectionEvent::Opened, _) => tracing::debug!("Streaming connection ready"),
            (ConnectionEvent::Closed, _) => {
                if let Some(banner) = &state.error_banner {
                    println!();
                    println!("! {banner}");
                }
                self.begin_turn();
            }
            (ConnectionEvent::Message(_), Some(Applied::Token { started })) => {
                if *started {
                    self.printed = 0;
                    print!("tutor> ");
                }
                if let Some(entry) = state.conversation.streaming_entry() {
                    print!("{}", entry.content.get(self.printed..).unwrap_or_default());
                    self.printed = entry.content.len();
                    self.streamed = true;
                }
                let _ = std::io::stdout().flush();
            }
            (ConnectionEvent::Message(_), Some(Applied::Final { problem_changed })) => {
                if self.streamed {
                    println!();
                } else {
                    print_last_reply(state);
                }
                if *problem_changed {
                    print_problem(state);
                }
                self.begin_turn();
            }
            (ConnectionEvent::Message(_), Some(Applied::Error { message })) => {
                println!();
                println!("! {message}");
                self.begin_turn();
            }
            (ConnectionEvent::Message(_), _) => {}
        }
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  API: {}", config.api_base_url);
    if config.streaming {
        println!("  Streaming: {}", config.ws_url);
    } else {
        println!("  Streaming: disabled");
    }
    println!("  Data directory: {}", config.data_dir);
}

fn print_problem(state: &SessionState) {
    match &state.current_problem {
        Some(problem) => {
            println!();
            println!("=== {} [{}] ===", problem.title, problem.difficulty);
            if !problem.description.is_empty() {
                println!("{}", problem.description);
            }
        }
        None => println!("No problem selected"),
    }
}

fn print_conversation(state: &SessionState) {
    for entry in &state.conversation {
        println!("{}> {}", entry.role, entry.content);
    }
}

fn print_last_reply(state: &SessionState) {
    if let Some(entry) = state
        .conversation
        .iter()
        .rev()
        .find(|e| e.role != Role::User)
    {
        println!("{}> {}", entry.role, entry.content);
    }
}

fn print_status(state: &SessionState) {
    println!("Connection: {}", state.connection);
    match (&state.user, state.authenticated) {
        (Some(user), _) => println!("Account: {}", user.username),
        (None, true) => println!("Account: logged in"),
        (None, false) => println!("Account: not logged in"),
    }
    match &state.current_problem {
        Some(problem) => println!("Problem: {} ({})", problem.title, problem.difficulty),
        None => println!("Problem: none"),
    }
    println!("Messages: {}", state.conversation.len());
    println!("Code: {} lines", state.code.lines().count());
    if let Some(banner) = &state.error_banner {
        println!("Error: {banner}");
    }
}
