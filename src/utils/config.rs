#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use log::{info, error, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as Log4rsConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Deserialize;
use std::{env, fs, path::Path, time::Duration};
use structopt::StructOpt;
use toml;

// Greeting service utilities
use crate::utils::counter::{CounterBackend, LocalCounterStore, SharedCounterStore};
use crate::utils::errors::Errors;
use crate::utils::greet_utils::get_absolute_path;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// File locations.  The log4rs file, when present, sits next to the TOML
// configuration file.
const ENV_CONFIG_FILE      : &str = "GREET_CONFIG_FILE";
const DEFAULT_CONFIG_FILE  : &str = "~/.greet_server/config/greet-server.toml";
const LOG4RS_CONFIG_FILE   : &str = "log4rs.yml";

// Networking.  The listening port is part of the service contract.
pub const DEFAULT_HTTP_ADDR : &str = "0.0.0.0";
pub const HTTP_PORT         : u16  = 8080;

// Environment variables read at startup or, for the demo pair, per request.
pub const ENV_NODE_NAME    : &str = "NODE_NAME";
pub const ENV_CONFIG       : &str = "CONFIG";
pub const ENV_SECRET       : &str = "SECRET";

// Shared counter store defaults.
const DEFAULT_KV_URL          : &str = "http://localhost:6379";
const DEFAULT_KV_TIMEOUT_SECS : u64  = 2;

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Assign the command line arguments BEFORE RUNTIME_CTX is initialized in main.
lazy_static! {
    pub static ref GREET_ARGS: GreetArgs = init_greet_args();
}

// ***************************************************************************
//                               Config Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// CommandLineArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, Default, StructOpt)]
#[structopt(name = "greet_args", about = "Command line arguments for the greeting server.")]
pub struct GreetArgs {
    /// Path to the TOML configuration file.
    ///
    /// The GREET_CONFIG_FILE environment variable takes precedence over this
    /// argument; when neither is set, ~/.greet_server/config/greet-server.toml
    /// is tried and a missing file falls back to built-in defaults.
    #[structopt(short, long)]
    pub config_file: Option<String>,

    /// Echo the CONFIG and SECRET environment variables in greeting responses.
    ///
    /// This reproduces the secret-leakage demonstration of the original
    /// service and intentionally leaks whatever those variables hold.
    /// Demo use only.
    #[structopt(long)]
    pub insecure_demo: bool,
}

// ---------------------------------------------------------------------------
// Parms:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct Parms {
    pub config_file: String,
    pub config: Config,
}

// ---------------------------------------------------------------------------
// RuntimeCtx:
// ---------------------------------------------------------------------------
/** Immutable per-process state: parsed parameters, identity read from the
 * operating environment at startup, and the counter store backend the
 * configuration selected.
 */
#[derive(Debug)]
#[allow(dead_code)]
pub struct RuntimeCtx {
    pub parms: Parms,
    pub hostname: String,
    pub node_name: Option<String>,
    pub counter: CounterBackend,
    pub insecure_demo: bool,
    pub greet_args: &'static GreetArgs,
}

// ---------------------------------------------------------------------------
// Config:
// ---------------------------------------------------------------------------
#[derive(Debug, Deserialize)]
#[serde(default)]
#[allow(dead_code)]
pub struct Config {
    pub title: String,
    pub counter_backend: CounterKind,
    pub kv_url: String,
    pub kv_timeout_secs: u64,
    pub insecure_demo: bool,
}

/// Which counter store realization backs the greeting handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    Local,
    Shared,
}

impl Config {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Config::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "Greet Server".to_string(),
            counter_backend: CounterKind::Local,
            kv_url: DEFAULT_KV_URL.to_string(),
            kv_timeout_secs: DEFAULT_KV_TIMEOUT_SECS,
            insecure_demo: false,
        }
    }
}

// ***************************************************************************
//                             Argument Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_greet_args:
// ---------------------------------------------------------------------------
/** Get the command line arguments. */
fn init_greet_args() -> GreetArgs {
    // The test harness owns the command line during unit tests.
    if cfg!(test) {
        return GreetArgs::default();
    }
    let args = GreetArgs::from_args();
    println!("{:?}", args);
    args
}

// ***************************************************************************
//                               Log Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_log:
// ---------------------------------------------------------------------------
/** Initialize log4rs logging.  A log4rs.yml next to the configuration file
 * wins; without one we fall back to a console appender at Info level.
 */
pub fn init_log() {
    let logconfig = init_log_config();
    if Path::new(&logconfig).is_file() {
        match log4rs::init_file(logconfig.clone(), Default::default()) {
            Ok(_) => (),
            Err(e) => {
                println!("{}", e);
                let s = format!("{}", Errors::Log4rsInitialization(logconfig.clone()));
                panic!("{}", s);
            },
        }
        info!("Log4rs initialized using: {}", logconfig);
    } else {
        init_console_log();
        info!("Log4rs initialized with the default console appender.");
    }
}

// ---------------------------------------------------------------------------
// init_log_config:
// ---------------------------------------------------------------------------
fn init_log_config() -> String {
    let config_file = resolve_config_file();
    match Path::new(&config_file).parent() {
        Some(dir) => dir.join(LOG4RS_CONFIG_FILE).to_string_lossy().into_owned(),
        None => LOG4RS_CONFIG_FILE.to_string(),
    }
}

// ---------------------------------------------------------------------------
// init_console_log:
// ---------------------------------------------------------------------------
fn init_console_log() {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}")))
        .build();
    let config = Log4rsConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config {
        Ok(c) => {
            let _ = log4rs::init_config(c);
        },
        Err(e) => println!("{}", e),
    }
}

/// ***************************************************************************
//                             Parms Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// resolve_config_file:
// ---------------------------------------------------------------------------
fn resolve_config_file() -> String {
    // Order of precedence:
    //  1. Environment variable
    //  2. Command line --config-file argument
    //  3. Default location
    //
    let config_file = env::var(ENV_CONFIG_FILE).unwrap_or_else(
        |_| {
            match GREET_ARGS.config_file.clone() {
                Some(f) => f,
                None => DEFAULT_CONFIG_FILE.to_string(),
            }
        });

    // Canonicalize the path.
    get_absolute_path(&config_file)
}

// ---------------------------------------------------------------------------
// get_parms:
// ---------------------------------------------------------------------------
/** Retrieve the application parameters from the configuration file specified
 * either through an environment variable or as a command line argument.  If
 * neither is provided, an attempt is made to use the default file path.
 */
fn get_parms() -> Result<Parms> {
    // Read the configuration file.
    let config_file_abs = resolve_config_file();
    info!("{}", Errors::ReadingConfigFile(config_file_abs.clone()));
    let contents = match fs::read_to_string(&config_file_abs) {
        Ok(c) => c,
        Err(_) => {
            println!("Unable to read configuration at {}. Using default values.", config_file_abs);
            return Ok(Parms { config_file: Default::default(), config: Config::new() });
        }
    };

    // Parse the toml configuration.
    let config : Config = match toml::from_str(&contents) {
        Ok(c)  => c,
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::TOMLParseError(config_file_abs), e);
            error!("{}", msg);
            return Result::Err(anyhow!(msg));
        }
    };

    Ok(Parms { config_file: config_file_abs, config })
}

// ***************************************************************************
//                             Config Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_runtime_context:
// ---------------------------------------------------------------------------
pub fn init_runtime_context() -> RuntimeCtx {
    // If this fails the application aborts.
    let parms = get_parms().expect("FAILED to read configuration file.");
    let hostname = get_hostname();
    // An empty NODE_NAME is the same as an absent one.
    let node_name = env::var(ENV_NODE_NAME).ok().filter(|n| !n.is_empty());
    let counter = init_counter(&parms.config);
    let insecure_demo = parms.config.insecure_demo || GREET_ARGS.insecure_demo;
    RuntimeCtx { parms, hostname, node_name, counter, insecure_demo, greet_args: &GREET_ARGS }
}

// ---------------------------------------------------------------------------
// get_hostname:
// ---------------------------------------------------------------------------
/** Resolve the machine hostname from the operating environment. */
fn get_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

// ---------------------------------------------------------------------------
// init_counter:
// ---------------------------------------------------------------------------
/** Construct the counter store backend the configuration selected.  A shared
 * client that cannot be built aborts startup; reachability problems, on the
 * other hand, surface later per request.
 */
fn init_counter(config: &Config) -> CounterBackend {
    match config.counter_backend {
        CounterKind::Local => {
            info!("Using the process-local counter store.");
            CounterBackend::Local(LocalCounterStore::new())
        },
        CounterKind::Shared => {
            info!("Using the shared counter store at {}.", config.kv_url);
            let store = SharedCounterStore::new(
                    &config.kv_url,
                    Duration::from_secs(config.kv_timeout_secs))
                .expect("FAILED to initialize the shared counter client.");
            CounterBackend::Shared(store)
        },
    }
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use crate::utils::config::{Config, CounterKind, DEFAULT_KV_TIMEOUT_SECS};

    #[test]
    fn print_config() {
        println!("{:?}", Config::new());
    }

    #[test]
    fn default_backend_is_local() {
        let config = Config::new();
        assert_eq!(config.counter_backend, CounterKind::Local);
        assert_eq!(config.kv_url, "http://localhost:6379");
        assert!(!config.insecure_demo);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: Config = toml::from_str(
            "counter_backend = \"shared\"\nkv_url = \"http://kv:9000\"",
        )
        .unwrap();
        assert_eq!(config.counter_backend, CounterKind::Shared);
        assert_eq!(config.kv_url, "http://kv:9000");
        assert_eq!(config.kv_timeout_secs, DEFAULT_KV_TIMEOUT_SECS);
    }
}
