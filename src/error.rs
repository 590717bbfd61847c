use std::fmt;

/// Raised synchronously when a caller registers a malformed mock.
///
/// Carries every issue found while validating the mock declaration, not just
/// the first one — see [`crate::validate`].
#[derive(Debug, Clone, thiserror::Error)]
pub struct ValidationError {
    issues: Vec<String>,
}

impl ValidationError {
    pub(crate) fn new(issues: Vec<String>) -> Self {
        debug_assert!(!issues.is_empty());
        Self { issues }
    }

    /// The individual path-prefixed issues, in the order they were found.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.issues.join("\n"))
    }
}

/// Raised by `assert_done` or `reset` when one or more registered mocks never
/// matched any traffic.
#[derive(Debug, Clone, thiserror::Error)]
pub struct PendingMockError {
    pending: Vec<String>,
}

impl PendingMockError {
    pub(crate) fn new(pending: Vec<String>) -> Self {
        debug_assert!(!pending.is_empty());
        Self { pending }
    }

    /// The printable form of each still-pending mock.
    pub fn pending(&self) -> &[String] {
        &self.pending
    }
}

impl fmt::Display for PendingMockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} mock(s) still pending:", self.pending.len())?;
        for (i, p) in self.pending.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {p}")?;
        }
        Ok(())
    }
}

/// Transport / setup failures: binding the listening socket, spawning the
/// accept thread. Distinct from the two user-visible exception types named by
/// the spec (`ValidationError`, `PendingMockError`) because it signals an
/// environment problem, not a misuse of the mocking API.
#[derive(Debug, thiserror::Error)]
pub enum NetmockError {
    #[error("failed to bind listening socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("server is not listening")]
    NotListening,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Pending(#[from] PendingMockError),
}
