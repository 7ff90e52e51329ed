/// Failure codes a handler (or the worker on its behalf) can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Timeout,
    Panic,
    BadPayload,
    UnknownJobType,
    DeliveryFailed,
    Unknown,
}

const NAMES: &[(ErrorCode, &str)] = &[
    (ErrorCode::Timeout, "TIMEOUT"),
    (ErrorCode::Panic, "PANIC"),
    (ErrorCode::BadPayload, "BAD_PAYLOAD"),
    (ErrorCode::UnknownJobType, "UNKNOWN_JOB_TYPE"),
    (ErrorCode::DeliveryFailed, "DELIVERY_FAILED"),
    (ErrorCode::Unknown, "UNKNOWN"),
];

impl ErrorCode {
    /// Case-insensitive; anything unrecognised is `Unknown`.
    pub fn parse(code: &str) -> Self {
        let code = code.trim();
        NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(code))
            .map(|(c, _)| *c)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        NAMES
            .iter()
            .find(|(c, _)| c == self)
            .map(|(_, name)| *name)
            .unwrap_or("UNKNOWN")
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for (code, name) in NAMES {
            assert_eq!(ErrorCode::parse(name), *code);
            assert_eq!(code.as_str(), *name);
        }
        assert_eq!(ErrorCode::parse(" bad_payload "), ErrorCode::BadPayload);
        assert_eq!(ErrorCode::parse("SMTP_421"), ErrorCode::Unknown);
    }
}
