#![forbid(unsafe_code)]

use thiserror::Error;

/// Error enumerates the errors returned by this application.
#[derive(Error, Debug)]
pub enum Errors {
    /// Input parameter logging.
    #[error("greet_server input parameters:\n{}", .0)]
    InputParms(String),

    /// Inaccessible logger configuration file.
    #[error("Unable to access the Log4rs configuration file: {}", .0)]
    Log4rsInitialization(String),

    #[error("Reading application configuration file: {}", .0)]
    ReadingConfigFile(String),

    #[error("Unable to parse TOML file: {}", .0)]
    TOMLParseError(String),

    /// The main loop ended, usually because the fixed port could not be bound.
    #[error("HTTP listener terminated: {}", .0)]
    ListenerTerminated(String),

    /// Shared counter store client could not be constructed at startup.
    #[error("Unable to initialize the shared counter client: {}", .0)]
    CounterClientInitialization(String),

    /// The shared counter store could not be reached.
    #[error("Shared counter store unavailable: {}", .0)]
    CounterStoreUnavailable(String),

    /// The shared counter store answered with something other than a count.
    #[error("Unexpected reply from the shared counter store: {}", .0)]
    CounterStoreResponse(String),
}
