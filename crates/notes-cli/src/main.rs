//! notes-cli: interactive terminal client for the notes service.
//!
//! Runs as a shell rather than one-shot subcommands: the server's session
//! cookie lives in the process's cookie jar, so the process has to outlive
//! the login. The signed-in identity is still saved to disk and restored on
//! the next start; if the server no longer knows the session, the first
//! request clears it.

mod command;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use notes_core::{
    ClientConfig, ClientError, ClientEvent, CodeRequest, ErrorKind, FileIdentityStore, FlowKind,
    HttpRemote, Note, NotesClient, OtpAttempt,
};

use crate::command::{Command, HELP};

#[derive(Parser, Debug)]
#[command(name = "notes-cli")]
#[command(about = "Sign in with an emailed code and manage your notes")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long, env = "NOTES_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the account service
    #[arg(long, env = "NOTES_USER_API")]
    user_api: Option<String>,

    /// Base URL of the note service
    #[arg(long, env = "NOTES_NOTE_API")]
    note_api: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("notes-client").join("config.json"))
}

fn session_path(config: &ClientConfig) -> Result<PathBuf> {
    if let Some(path) = &config.session_file {
        return Ok(PathBuf::from(path));
    }
    dirs::data_dir()
        .map(|dir| dir.join("notes-client").join("session.json"))
        .context("No data directory on this platform; set session_file in the config")
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let config = match args.config.clone().or_else(default_config_path) {
        Some(path) => ClientConfig::load(&path)?,
        None => ClientConfig::default(),
    };
    // clap already folded the env vars into these flags
    Ok(config.with_overrides(args.user_api.clone(), args.note_api.clone())?)
}

/// The line an event prints, if any.
fn describe_event(event: &ClientEvent) -> Option<String> {
    let line = match event {
        ClientEvent::CodeSent { email, message, .. } => {
            format!("{} ({})", message.as_deref().unwrap_or("Code sent"), email)
        }
        ClientEvent::SessionAdopted {
            user_id, restored, ..
        } => {
            if *restored {
                format!("Welcome back ({})", user_id)
            } else {
                format!("Signed in as {}", user_id)
            }
        }
        ClientEvent::SessionCleared { .. } => "Signed out".to_string(),
        ClientEvent::NotesLoaded { count, .. } => format!("{} note(s)", count),
        ClientEvent::NoteCreated { message, .. } => {
            message.clone().unwrap_or_else(|| "Note created".to_string())
        }
        ClientEvent::NoteDeleted { note_id, .. } => format!("Deleted {}", note_id),
        // Command results already print their own errors
        ClientEvent::VerificationFailed { .. } | ClientEvent::OperationFailed { .. } => return None,
    };
    Some(line)
}

fn print_event(event: &ClientEvent) {
    if let Some(line) = describe_event(event) {
        println!("{}", line);
    }
}

fn print_note_line(note: &Note) {
    println!(
        "{:<26} {}  {}",
        note.id,
        note.updated_at.format("%Y-%m-%d %H:%M"),
        note.title
    );
}

struct Shell {
    client: NotesClient<HttpRemote>,
    lines: Lines<BufReader<Stdin>>,
}

impl Shell {
    /// Print `label` and read one line. `None` on end of input.
    async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        print!("{}", label);
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }

    /// Prompt for the emailed code until it is accepted.
    ///
    /// A rejected or malformed code asks again without requesting a new one.
    /// An empty answer stops prompting and leaves the attempt pending, to be
    /// finished with `code <otp>` or abandoned with `cancel`.
    async fn enter_code(&mut self, kind: FlowKind) -> Result<()> {
        loop {
            let code = self.prompt("code> ").await?.unwrap_or_default();
            let code = code.trim();
            if code.is_empty() {
                println!("Code still pending; use 'code <otp>' or 'cancel'");
                return Ok(());
            }
            match self.verify(kind, code).await {
                Ok(()) => return Ok(()),
                Err(e) if matches!(e.kind(), ErrorKind::Validation | ErrorKind::RemoteRejection) => {
                    println!("{}; try again or press enter to stop", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn verify(&self, kind: FlowKind, code: &str) -> Result<(), ClientError> {
        match kind {
            FlowKind::Signup => self.client.verify_signup_code(code).await.map(|_| ()),
            FlowKind::Signin => self.client.verify_signin_code(code).await.map(|_| ()),
        }
    }

    /// The flow with a code outstanding, sign-in first.
    fn pending_flow(&self) -> Option<FlowKind> {
        let awaiting = |attempt: OtpAttempt| attempt.otp_requested && !attempt.phase.is_busy();
        if awaiting(self.client.signin_attempt()) {
            Some(FlowKind::Signin)
        } else if awaiting(self.client.signup_attempt()) {
            Some(FlowKind::Signup)
        } else {
            None
        }
    }

    /// Collect note content up to a lone `.`
    async fn read_content(&mut self) -> Result<String> {
        let mut content = Vec::new();
        while let Some(line) = self.prompt("... ").await? {
            if line.trim() == "." {
                break;
            }
            content.push(line);
        }
        Ok(content.join("\n"))
    }

    /// Run one command. Returns `false` when the shell should exit.
    async fn execute(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Signup {
                email,
                date_of_birth,
                name,
            } => {
                self.client
                    .request_signup_code(CodeRequest::signup(name, date_of_birth, email))
                    .await?;
                self.enter_code(FlowKind::Signup).await?;
            }
            Command::Signin { email } => {
                self.client.request_signin_code(&email).await?;
                self.enter_code(FlowKind::Signin).await?;
            }
            Command::Code { otp } => match self.pending_flow() {
                Some(kind) => self.verify(kind, &otp).await?,
                None => println!("No code pending; run 'signup' or 'signin' first"),
            },
            Command::Cancel => {
                self.client.cancel_signin()?;
                self.client.cancel_signup()?;
            }
            Command::Whoami => match self.client.identity() {
                Some(identity) => println!(
                    "{} <{}> ({})",
                    identity.name.as_deref().unwrap_or("-"),
                    identity.email,
                    identity.user_id
                ),
                None => println!("Not signed in"),
            },
            Command::List => {
                self.client.load_notes().await?;
                for note in self.client.notes() {
                    print_note_line(&note);
                }
            }
            Command::Show { id } => match self.client.note(&id) {
                Some(note) => {
                    println!("# {}\n", note.title);
                    println!("{}", note.content);
                }
                None => println!("No cached note {:?}; try 'list'", id),
            },
            Command::Create { title } => {
                let content = self.read_content().await?;
                self.client.create_note(&title, &content).await?;
            }
            Command::Delete { id } => {
                self.client.delete_note(&id).await?;
            }
            Command::Signout => self.client.sign_out().await?,
            Command::Help => println!("{}", HELP),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            let line = tokio::select! {
                line = self.prompt("notes> ") => line?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            };
            let Some(line) = line else {
                break;
            };
            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };
            debug!(?command, "Executing");
            match self.execute(command).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("error: {}", e),
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to warn (or debug with --verbose)
    let default_filter = if args.verbose {
        "warn,notes_cli=debug,notes_core=debug"
    } else {
        "warn,notes_cli=info,notes_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let session_file = session_path(&config)?;
    info!("User API: {}", config.user_api_base);
    info!("Note API: {}", config.note_api_base);
    debug!("Session file: {:?}", session_file);

    let remote = HttpRemote::new(&config)?;
    let client = NotesClient::new(
        Arc::new(remote),
        Box::new(FileIdentityStore::new(session_file)),
    );
    let _events = client.events().subscribe(|event| print_event(event));

    if let Err(e) = client.restore().await {
        println!("Could not restore the previous session: {}", e);
    }

    println!("Type 'help' for commands.");
    let mut shell = Shell {
        client,
        lines: BufReader::new(tokio::io::stdin()).lines(),
    };
    shell.run().await?;

    info!("Shutting down");
    Ok(())
}
