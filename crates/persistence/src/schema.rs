//! Database schema definitions

/// SQL to create all tables
/// NOTE: All prices/amounts stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Generated grid strategies (one row per distinct config + ladder)
CREATE TABLE IF NOT EXISTS strategies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL UNIQUE,
    name TEXT,
    a TEXT NOT NULL,
    b TEXT NOT NULL,
    first_trigger_price TEXT NOT NULL,
    total_rows INTEGER NOT NULL,
    buy_amount TEXT NOT NULL,
    policy_json TEXT NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Ladder rows of a strategy
CREATE TABLE IF NOT EXISTS grid_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id INTEGER NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
    row_index INTEGER NOT NULL,
    level_ratio TEXT NOT NULL,
    buy_trigger_price TEXT NOT NULL,
    buy_price TEXT NOT NULL,
    buy_amount TEXT NOT NULL,
    shares TEXT NOT NULL,
    sell_price TEXT NOT NULL,
    UNIQUE (strategy_id, row_index)
);

-- One record per imported market data file
CREATE TABLE IF NOT EXISTS market_imports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT,
    code TEXT NOT NULL,
    record_count INTEGER NOT NULL DEFAULT 0,
    date_range TEXT,
    imported_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Daily bars, one per instrument and date
CREATE TABLE IF NOT EXISTS market_bars (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    import_id INTEGER NOT NULL REFERENCES market_imports(id) ON DELETE CASCADE,
    code TEXT NOT NULL,
    date TEXT NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    close TEXT NOT NULL,
    volume TEXT NOT NULL,
    UNIQUE (code, date)
);

-- Completed backtest runs
CREATE TABLE IF NOT EXISTS backtest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id INTEGER NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
    fingerprint TEXT NOT NULL,
    code TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    initial_cash TEXT NOT NULL,
    fill_policy TEXT NOT NULL,
    equity_json TEXT NOT NULL,
    trades_json TEXT NOT NULL,
    skipped_json TEXT NOT NULL,
    metrics_json TEXT NOT NULL,
    total_return TEXT NOT NULL DEFAULT '0',
    max_drawdown TEXT NOT NULL DEFAULT '0',
    trade_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_grid_rows_strategy ON grid_rows(strategy_id, row_index);
CREATE INDEX IF NOT EXISTS idx_market_bars_code_date ON market_bars(code, date);
CREATE INDEX IF NOT EXISTS idx_market_bars_import ON market_bars(import_id);
CREATE INDEX IF NOT EXISTS idx_backtest_strategy ON backtest_runs(strategy_id);
CREATE INDEX IF NOT EXISTS idx_backtest_fingerprint ON backtest_runs(fingerprint)
"#;
