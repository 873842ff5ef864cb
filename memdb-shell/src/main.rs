mod command;
mod shell;

use clap::{ArgAction, Parser};
use command::{parse, Command, HELP};
use log::LevelFilter;
use memdb::config::ConnectionConfig;
use memdb::connection::{ConnectionEvent, ConnectionEventListener};
use memdb::errors::{ErrorKind, MemDbError, MemDbResult};
use memdb::memdb::MemDb;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use shell::Shell;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 31017;

#[derive(Parser, Debug)]
#[command(name = "memdb")]
#[command(about = "MemDB shell")]
#[command(disable_help_flag = true)]
struct Options {
    /// memdb shard ip
    #[arg(short = 'h', long, default_value = DEFAULT_HOST)]
    host: String,

    /// memdb shard port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// cluster config file; a single shard on host:port is started when absent
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// display help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

fn main() {
    let options = Options::parse();
    colog::default_builder().filter_level(LevelFilter::Off).init();

    if let Err(e) = run(options) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run(options: Options) -> MemDbResult<()> {
    let builder = MemDb::builder();
    let builder = match &options.config {
        Some(path) => builder.config_file(path),
        None => builder.shard("s1", &options.host, options.port),
    };
    let db = builder.open()?;
    let autoconn = db.connect(&ConnectionConfig::new(&options.host, options.port).with_idle_timeout(0))?;
    autoconn.subscribe(ConnectionEventListener::new(|info| {
        if info.event() == ConnectionEvent::Error {
            println!("Connection lost");
        }
        Ok(())
    }))?;

    println!("MemDB shell connected to {}:{}", options.host, options.port);
    println!("Type help for the command reference");

    let mut shell = Shell::new(autoconn);
    let result = repl(&mut shell);
    if let Err(e) = shell.close() {
        log::warn!("Failed to close connection: {}", e);
    }
    db.shutdown();
    println!("Bye");
    result
}

fn repl(shell: &mut Shell) -> MemDbResult<()> {
    let mut editor = DefaultEditor::new().map_err(|e| {
        MemDbError::new(
            &format!("Shell initialization failed: {}", e),
            ErrorKind::InternalError,
        )
    })?;

    loop {
        match editor.readline("memdb> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.trim());
                match parse(&line, shell.last()) {
                    Ok(Command::Exit) => break,
                    Ok(Command::Help) => println!("{}", HELP),
                    Ok(command) => match shell.execute(command) {
                        Ok(result) => print_json(&result),
                        Err(e) => println!("{}\n(Changes are rolled back)", e),
                    },
                    Err(e) => println!("{}", e),
                }
            }
            Err(ReadlineError::Interrupted) => println!("^C (type exit to quit)"),
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                return Err(MemDbError::new(
                    &format!("Shell read failure: {}", e),
                    ErrorKind::InternalError,
                ))
            }
        }
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}
