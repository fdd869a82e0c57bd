//! Parsing of interactive input lines.

/// One line of learner input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: a chat message.
    Chat(String),
    Login { username: String, password: String },
    Register {
        username: String,
        email: String,
        password: String,
    },
    Logout,
    Profile,
    Problems { search: Option<String> },
    Problem(u64),
    Completion(bool),
    /// Load the buffer from a file.
    Code(String),
    ShowCode,
    Save,
    Evaluate,
    Reset,
    Clear,
    Dismiss,
    Status,
    Help,
    Quit,
}

/// Usage text printed by `/help`.
pub const HELP: &str = "\
Commands:
  <text>                          Send a message to the tutor
  /login <user> <password>        Log in
  /register <user> <email> <pw>   Create an account
  /logout                         Forget stored credentials
  /profile                        Show the account profile
  /problems [search]              List problems
  /problem <id>                   Select a problem
  /done, /undone                  Mark the current problem solved or unsolved
  /code <path>                    Replace the code buffer with a file
  /show-code                      Print the code buffer
  /save                           Save the code buffer now
  /evaluate                       Ask the tutor to review the code buffer
  /reset                          Reset the current problem (asks to confirm)
  /clear                          Start a new session
  /dismiss                        Clear the error banner
  /status                         Show session state
  /help                           Show this help
  /quit                           Exit";

/// Parses a non-empty input line.
///
/// # Errors
///
/// Returns a usage message for an unknown command or missing arguments.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Chat(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("login", [username, password]) => Ok(Command::Login {
            username: (*username).to_string(),
            password: (*password).to_string(),
        }),
        ("register", [username, email, password]) => Ok(Command::Register {
            username: (*username).to_string(),
            email: (*email).to_string(),
            password: (*password).to_string(),
        }),
        ("logout", []) => Ok(Command::Logout),
        ("profile", []) => Ok(Command::Profile),
        ("problems", search) => Ok(Command::Problems {
            search: (!search.is_empty()).then(|| search.join(" ")),
        }),
        ("problem", [id]) => id
            .parse()
            .map(Command::Problem)
            .map_err(|_| format!("Not a problem id: {id}")),
        ("done", []) => Ok(Command::Completion(true)),
        ("undone", []) => Ok(Command::Completion(false)),
        ("code", [path]) => Ok(Command::Code((*path).to_string())),
        ("show-code", []) => Ok(Command::ShowCode),
        ("save", []) => Ok(Command::Save),
        ("evaluate", []) => Ok(Command::Evaluate),
        ("reset", []) => Ok(Command::Reset),
        ("clear", []) => Ok(Command::Clear),
        ("dismiss", []) => Ok(Command::Dismiss),
        ("status", []) => Ok(Command::Status),
        ("help", []) => Ok(Command::Help),
        ("quit" | "exit", []) => Ok(Command::Quit),
        _ => Err(format!("Unknown command or wrong arguments: /{rest}\nType /help for usage")),
    }
}
