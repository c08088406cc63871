//! 题库数据库管理模块
//!
//! 提供题库的 SQLite 数据库初始化和管理功能。
//! 使用 r2d2 连接池，支持并发访问。
//!
//! ## 设计原则
//! - **单一数据库**：使用单个 `concept_bank.db`
//! - **连接池管理**：使用 r2d2 管理连接池
//! - **模块内迁移**：通过 `PRAGMA user_version` 记录 schema 版本

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use super::error::{BankError, BankResult};
use crate::config::Settings;

/// 数据库文件名
const DATABASE_FILENAME: &str = "concept_bank.db";

/// 默认连接池大小（SQLite 单写者模型下无需太多连接）
const DEFAULT_POOL_MAX_SIZE: u32 = 15;

/// 当前 Schema 版本（`PRAGMA user_version`）
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQLite 连接池类型
pub type BankPool = Pool<SqliteConnectionManager>;

/// SQLite 池化连接类型
pub type BankPooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// v1 schema：题目、问卷（页面/元素）、问卷上下文与 GIFT key 关联
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS questions (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    concepts TEXT NOT NULL DEFAULT '[]',
    highest_possible_score REAL NOT NULL DEFAULT 0,
    properties TEXT NOT NULL DEFAULT '{}',
    editable_to TEXT NOT NULL DEFAULT '[]',
    visible_to TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS surveys (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    survey_type TEXT NOT NULL DEFAULT 'authored',
    unpresentable INTEGER NOT NULL DEFAULT 0,
    editable_to TEXT NOT NULL DEFAULT '[]',
    visible_to TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS survey_pages (
    id TEXT PRIMARY KEY,
    survey_id TEXT NOT NULL REFERENCES surveys(id),
    name TEXT NOT NULL,
    page_index INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS survey_elements (
    id TEXT PRIMARY KEY,
    page_id TEXT NOT NULL REFERENCES survey_pages(id),
    element_index INTEGER NOT NULL,
    element_type TEXT NOT NULL,
    question_id TEXT REFERENCES questions(id),
    text_content TEXT
);

CREATE TABLE IF NOT EXISTS survey_contexts (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    editable_to TEXT NOT NULL DEFAULT '[]',
    visible_to TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS survey_context_surveys (
    context_id TEXT NOT NULL REFERENCES survey_contexts(id),
    gift_key TEXT NOT NULL,
    survey_id TEXT NOT NULL REFERENCES surveys(id),
    PRIMARY KEY (context_id, gift_key)
);

CREATE INDEX IF NOT EXISTS idx_survey_pages_survey ON survey_pages(survey_id);
CREATE INDEX IF NOT EXISTS idx_survey_elements_page ON survey_elements(page_id);
CREATE INDEX IF NOT EXISTS idx_survey_elements_question ON survey_elements(question_id);
CREATE INDEX IF NOT EXISTS idx_scs_survey ON survey_context_surveys(survey_id);
"#;

/// 题库数据库管理器
///
/// 管理题库模块的 SQLite 数据库文件（`concept_bank.db`）。
/// 支持：
/// - r2d2 连接池管理
/// - 模块内自动迁移
/// - WAL 模式提升并发性能
pub struct BankDatabase {
    /// 数据库连接池
    pool: BankPool,
    /// 数据库文件路径
    db_path: PathBuf,
}

impl BankDatabase {
    /// 创建题库数据库管理器
    ///
    /// # Arguments
    /// * `data_dir` - 数据目录路径，数据库文件建在其下
    ///
    /// # Errors
    /// * 目录创建失败
    /// * 数据库连接失败
    /// * 迁移执行失败
    pub fn new(data_dir: &Path) -> BankResult<Self> {
        Self::with_pool_size(data_dir, DEFAULT_POOL_MAX_SIZE)
    }

    /// 按配置创建题库数据库管理器
    pub fn from_settings(settings: &Settings) -> BankResult<Self> {
        Self::with_pool_size(&settings.data_dir, settings.pool_max_size)
    }

    fn with_pool_size(data_dir: &Path, max_size: u32) -> BankResult<Self> {
        info!(
            "[Bank::Database] Initializing database in: {}",
            data_dir.display()
        );

        if let Err(e) = fs::create_dir_all(data_dir) {
            error!("[Bank::Database] Failed to create data directory: {}", e);
            return Err(BankError::Io(format!(
                "Failed to create data directory: {}",
                e
            )));
        }

        let db_path = data_dir.join(DATABASE_FILENAME);
        let pool = Self::build_pool(SqliteConnectionManager::file(&db_path), max_size)?;

        let db = Self { pool, db_path };
        db.run_migrations()?;

        info!(
            "[Bank::Database] Database ready: {}",
            db.db_path.display()
        );
        Ok(db)
    }

    /// 创建内存数据库（测试与基准测试用）
    ///
    /// 内存库必须保持单连接，否则各连接看到的是不同的数据库。
    pub fn open_in_memory() -> BankResult<Self> {
        let pool = Self::build_pool(SqliteConnectionManager::memory(), 1)?;
        let db = Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// 构建连接池
    fn build_pool(manager: SqliteConnectionManager, max_size: u32) -> BankResult<BankPool> {
        let manager = manager.with_init(|conn| {
            // 启用外键约束（必须！）
            conn.pragma_update(None, "foreign_keys", "ON")?;
            // 使用 WAL 模式提升并发性能
            conn.pragma_update(None, "journal_mode", "WAL")?;
            // 同步模式设为 NORMAL（平衡安全与性能）
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            // 设置 busy_timeout 避免无界等待
            conn.pragma_update(None, "busy_timeout", 5000i64)?;
            Ok(())
        });

        Pool::builder()
            .max_size(max_size)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|e| BankError::Pool(format!("Failed to create connection pool: {}", e)))
    }

    /// 获取数据库连接
    pub fn get_conn(&self) -> BankResult<BankPooledConnection> {
        self.pool
            .get()
            .map_err(|e| BankError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// 获取数据库文件路径
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 读取当前 schema 版本
    pub fn schema_version(&self) -> BankResult<u32> {
        let conn = self.get_conn()?;
        let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    /// 执行模块内迁移
    fn run_migrations(&self) -> BankResult<()> {
        let conn = self.get_conn()?;
        let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version >= CURRENT_SCHEMA_VERSION {
            debug!("[Bank::Database] Schema up to date: v{}", version);
            return Ok(());
        }

        info!(
            "[Bank::Database] Migrating schema: v{} -> v{}",
            version, CURRENT_SCHEMA_VERSION
        );

        if version < 1 {
            conn.execute_batch(SCHEMA_V1)?;
        }

        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
        Ok(())
    }
}
