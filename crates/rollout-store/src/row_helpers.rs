use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a JSON string column, returning CorruptRow on parse failure.
pub fn parse_json(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_enum_success() {
        let result: Result<crate::meta::RolloutStatus, _> =
            parse_enum("active", "rollouts", "status");
        assert!(result.is_ok());
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<crate::meta::RolloutStatus, _> =
            parse_enum("INVALID", "rollouts", "status");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "rollouts",
                column: "status",
                ..
            })
        ));
    }

    #[test]
    fn parse_json_success() {
        let result = parse_json(r#"{"key": "value"}"#, "rollout_items", "payload");
        assert!(result.is_ok());
        assert_eq!(result.unwrap()["key"], "value");
    }

    #[test]
    fn parse_json_failure() {
        let result = parse_json("not valid json", "rollout_items", "payload");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "rollout_items",
                column: "payload",
                ..
            })
        ));
    }
}
