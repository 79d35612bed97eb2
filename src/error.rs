pub use anyhow::Result;

/// The realization of the spec's `Fallible<T>` sum type: used for every
/// I/O-bearing Dataset and Mutable operation, carrying a human-readable
/// message on failure (spec §7). Value-level failure (type mismatch,
/// division by zero) never goes through this path — it surfaces as
/// [crate::value::Value::Invalid] instead.
pub type Fallible<T> = Result<T>;

/// A structured failure reason, used where callers need more than a
/// formatted string (e.g. a CLI that wants to print "expected X, found
/// Y" differently from a flat message).
#[derive(Debug, Clone)]
pub enum Reason {
    Simple(String),
    Expected { who: Option<String>, expected: String, found: String },
    Unexpected { found: String },
    NotFound { name: String, namespace: String },
}

impl Reason {
    fn message(&self) -> String {
        match self {
            Reason::Simple(text) => text.clone(),
            Reason::Expected { who, expected, found } => {
                let who = who.clone().map(|x| format!("{x} ")).unwrap_or_default();
                format!("{who}expected {expected}, but found {found}")
            }
            Reason::Unexpected { found } => format!("unexpected {found}"),
            Reason::NotFound { name, namespace } => format!("{namespace} `{name}` not found"),
        }
    }
}

/// A programming-error kind of failure — unique column violations,
/// reserved operation on an unsupported dialect, duplicate satisfy on a
/// Future (spec §7c). Most of the crate raises these as plain
/// `anyhow::Error` via `anyhow!`/`bail!`; this type exists for callers
/// that want to match on the reason rather than parse a string.
#[derive(Debug, Clone)]
pub struct Error {
    pub reason: Reason,
    pub help: Option<String>,
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error { reason, help: None }
    }

    pub fn with_help<S: Into<String>>(mut self, help: S) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason.message())?;
        if let Some(help) = &self.help {
            write!(f, " ({help})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub trait WithErrorInfo {
    fn with_help<S: Into<String>>(self, help: S) -> Self;
}

impl<T> WithErrorInfo for Result<T, Error> {
    fn with_help<S: Into<String>>(self, help: S) -> Self {
        self.map_err(|e| e.with_help(help))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_reason_formats_with_and_without_a_speaker() {
        let reason = Reason::Expected { who: None, expected: "a number".into(), found: "text".into() };
        assert_eq!(reason.message(), "expected a number, but found text");
    }

    #[test]
    fn error_display_includes_help_when_present() {
        let error = Error::new(Reason::Simple("bad input".into())).with_help("check the formula");
        assert_eq!(error.to_string(), "bad input (check the formula)");
    }
}
