//! Policy hook consulted by the router before credential selection.
//!
//! There is no policy engine; the hook exists so the router's control flow
//! has a stable place for one. It currently permits every request.

use crate::cli::CliRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Permit,
    Deny,
}

/// Evaluate a command against policy. Always permits.
pub fn evaluate(_request: &CliRequest) -> Decision {
    Decision::Permit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_is_permitted() {
        let req: CliRequest = serde_json::from_str(
            r#"{"tool":"codeforge","args":["repo","delete"],"resource":"acme/widgets"}"#,
        )
        .unwrap();
        assert_eq!(evaluate(&req), Decision::Permit);
    }
}
