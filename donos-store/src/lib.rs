pub mod cache;
pub mod log;

pub type Pool = sqlx::sqlite::SqlitePool;
pub type Transaction<'t> = sqlx::Transaction<'t, sqlx::Sqlite>;
pub type Error = sqlx::Error;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_url")]
    url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
        }
    }
}

impl Config {
    fn default_url() -> String {
        String::from("sqlite::memory:")
    }

    pub fn test_env() -> Self {
        Self {
            url: String::from("sqlite::memory:"),
        }
    }

    /// Builds a config from a `dns.log_database` path: `:memory:` maps to
    /// an in-memory database, anything else opens (creating if missing)
    /// the sqlite file at that path.
    pub fn from_path(path: &str) -> Self {
        let url = if path == ":memory:" {
            String::from("sqlite::memory:")
        } else {
            format!("sqlite://{path}?mode=rwc")
        };
        Self { url }
    }

    pub async fn build(&self) -> Result<Pool, Error> {
        sqlx::sqlite::SqlitePoolOptions::new()
            .connect(&self.url)
            .await
    }
}

pub async fn migrate(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
