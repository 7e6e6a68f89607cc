use serde::{Deserialize, Serialize};

/// Statement classification, computed once per request.
///
/// Variants are ordered by the privilege they demand, so `max` of two
/// kinds is the stricter one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    Write,
    Ddl,
    Unsupported,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Write => "WRITE",
            Self::Ddl => "DDL",
            Self::Unsupported => "UNSUPPORTED",
        }
    }

    /// Only reads may be served from a result cache.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Select)
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_and_read_only() {
        assert_eq!(StatementKind::Select.max(StatementKind::Write), StatementKind::Write);
        assert!(StatementKind::Select.is_read_only());
        assert!(!StatementKind::Write.is_read_only());
        assert!(!StatementKind::Ddl.is_read_only());
        assert_eq!(
            serde_json::to_string(&StatementKind::Ddl).unwrap(),
            "\"DDL\""
        );
    }
}
