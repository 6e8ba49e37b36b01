//! Gateway operations either succeed or raise a single category of error that
//! carries the underlying driver message (an `anyhow`-wrapped `sqlx::Error`, per
//! this workspace's general error-handling idiom). Callers that need to branch
//! on *kind* — specifically, to distinguish a benign exclusion/unique-constraint
//! race from a real failure — use the two predicates below rather than a
//! parallel error enum.

/// True if `err` is a Postgres exclusion-constraint violation on `constraint`.
/// Exclusion violations carry SQLSTATE `23P01`.
pub fn is_exclusion_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint) && db_err.code().as_deref() == Some("23P01")
        }
        _ => false,
    }
}

/// True if `err` is a Postgres unique-constraint violation on `constraint`.
/// Unique violations carry SQLSTATE `23505`.
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint) && db_err.code().as_deref() == Some("23505")
        }
        _ => false,
    }
}
