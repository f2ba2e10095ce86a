///
/// Lock acquisition errors.
///

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for lock")]
    Timeout { waited: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = LockError::Timeout {
            waited: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("Timed out"));
        assert!(err.to_string().contains("1s"));
    }
}
