pub mod artifact;
pub mod cli;
pub mod data;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod http;
pub mod preflight;
pub mod release;
pub mod trust;
pub mod util;

pub use artifact::{ArtifactVerifier, ScriptKind, NIMBUS_INSTALL_URL};
pub use error::{Result, ShiprError};
pub use exec::{ConfirmPrompt, LineSink, ScriptRunner, Severity, StaticAnswer, TtyPrompt};
pub use fetch::{take_backup, CancelToken, DownloadTask, Fetcher, TaskState};
pub use http::{HttpClient, HttpClientConfig};
pub use preflight::{CheckKind, OsFamily, PreFlight, ValidatorState};
pub use trust::{Keyring, SignatureBackend, VerifyOutcome, PINNED_FINGERPRINT};
