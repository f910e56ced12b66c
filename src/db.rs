// ==========================================
// 会计数据导入管道 - SQLite 连接初始化
// ==========================================
// 目标:
// - 配置库与加载库共用同一套 PRAGMA
// - 统一 busy_timeout，减少加载器并发写入时的偶发 busy 错误
// ==========================================

use rusqlite::Connection;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - WAL 模式允许加载写入时并发读取（内存库忽略）
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    if conn.path().map(|p| !p.is_empty()).unwrap_or(false) {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_applies_pragmas() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loader.db");
        let conn = open_sqlite_connection(&path.to_string_lossy()).unwrap();

        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
