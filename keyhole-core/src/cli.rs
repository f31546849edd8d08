//! Wire types for the `/cli` endpoint.

use serde::{Deserialize, Serialize};

/// Request body of `POST /cli`, emitted by the sandbox-side wrappers.
///
/// The proxy never trusts secret-bearing fields on requests; anything beyond
/// these three fields is rejected by serde.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliRequest {
    /// Tool binary name the wrapper re-emitted (e.g. `codeforge`).
    pub tool: String,
    /// Argument vector, passed to the real CLI verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Plugin-defined resource the command targets.
    pub resource: String,
}

impl CliRequest {
    /// First argument, used as the custom-command key.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// Response body of `POST /cli`. Returned with HTTP 200 on successful
/// dispatch regardless of the subprocess exit code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CliResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self { exit_code: 0, stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self { exit_code, stdout: String::new(), stderr: stderr.into() }
    }
}
