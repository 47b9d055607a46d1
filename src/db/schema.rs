use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Orders (one purchase attempt each; never deleted, they are the financial audit trail)
        -- lease_expires_at: set while a gateway confirm/cancel call is in flight
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            amount INTEGER NOT NULL CHECK (amount > 0),
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'failed', 'refunded', 'cancelled')),
            gateway_reference TEXT,
            created_at INTEGER NOT NULL,
            paid_at INTEGER,
            refunded_at INTEGER,
            lease_expires_at INTEGER,
            CHECK (status != 'completed' OR gateway_reference IS NOT NULL)
        );
        CREATE INDEX IF NOT EXISTS idx_orders_owner_status ON orders(owner, status);
        CREATE INDEX IF NOT EXISTS idx_orders_gateway_reference ON orders(gateway_reference);

        -- Order history (append-only typed event log)
        CREATE TABLE IF NOT EXISTS order_events (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id),
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_order_events_order ON order_events(order_id, created_at);

        -- Reports (read model of the reporting subsystem)
        CREATE TABLE IF NOT EXISTS reports (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            evaluator TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reports_subject ON reports(subject_id);

        -- Download records (one per issued link; the count per owner+report is the quota counter)
        CREATE TABLE IF NOT EXISTS download_records (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            order_id TEXT NOT NULL REFERENCES orders(id),
            report_id TEXT NOT NULL,
            slot INTEGER NOT NULL,
            issued_at INTEGER NOT NULL,
            client_ip TEXT,
            client_agent TEXT,
            UNIQUE(owner, report_id, slot)
        );
        CREATE INDEX IF NOT EXISTS idx_download_records_order ON download_records(order_id);
        "#,
    )?;

    Ok(())
}
