//! SQL schema for the paywire SQLite archive.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per correlation id; history lives in confirmation_changes.
CREATE TABLE IF NOT EXISTS confirmations (
    correlation_id     TEXT PRIMARY KEY,
    gateway            TEXT NOT NULL,    -- 'superpay' | 'superpay_br' | 'tryplopay'
    gateway_invoice_id TEXT,
    gateway_token      TEXT,
    status_code        INTEGER NOT NULL, -- gateway-native, for audit
    canonical_status   TEXT NOT NULL,
    amount_minor       INTEGER NOT NULL,
    paid_at            TEXT,             -- RFC 3339 UTC or NULL
    received_at        TEXT NOT NULL,
    expires_at         TEXT NOT NULL,    -- fixed at creation
    raw_json           TEXT NOT NULL,
    UNIQUE (correlation_id, gateway)
);

-- Append-only. Every write to confirmations adds one row here, in the
-- same transaction.
CREATE TABLE IF NOT EXISTS confirmation_changes (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_id TEXT NOT NULL,
    origin         TEXT NOT NULL,
    recorded_at    TEXT NOT NULL,
    record_json    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS confirmations_invoice_idx ON confirmations(gateway_invoice_id);
CREATE INDEX IF NOT EXISTS confirmations_token_idx   ON confirmations(gateway_token);
CREATE INDEX IF NOT EXISTS changes_correlation_idx   ON confirmation_changes(correlation_id);

PRAGMA user_version = 1;
";
