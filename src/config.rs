use std::path::PathBuf;

/// The configuration parameters for the application.
///
/// These can either be passed on the command line, or pulled from environment variables.
/// The latter is preferred as environment variables are one of the recommended ways to
/// get configuration from Kubernetes Secrets in deployment.
///
/// For development convenience, these can also be read from a `.env` file in the working
/// directory where the application is started.
///
/// See `.env.sample` in the repository root for details.
#[derive(clap::Parser, Debug, Clone)]
pub struct Config {
    /// The connection URL for the Postgres database this application should use.
    #[clap(long, env)]
    pub database_url: String,

    /// The HMAC signing and verification key used for login tokens (JWTs).
    ///
    /// There is no required structure or format to this key as it's just fed into a hash function.
    /// In practice, it should be a long, random string that would be infeasible to brute-force.
    #[clap(long, env)]
    pub hmac_key: String,

    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    /// Runtime mode, e.g. `development` or `production`. Only used for logging and to mark
    /// the session cookie `Secure` in production.
    #[clap(long, env, default_value = "development")]
    pub app_env: String,

    /// Directory served as static files; uploaded photos are written here.
    #[clap(long, env, default_value = "./public")]
    pub file_upload_path: PathBuf,

    /// Largest accepted upload, in bytes.
    #[clap(long, env, default_value = "1000000")]
    pub max_file_upload: u64,

    /// Requests admitted per client address within one rate limit window.
    #[clap(long, env, default_value = "100")]
    pub rate_limit_max: usize,

    #[clap(long, env, default_value = "600")]
    pub rate_limit_window_secs: u64,

    /// How long a login token (and its cookie) stays valid, at most ten years.
    #[clap(long, env, default_value = "30", value_parser = clap::value_parser!(i64).range(1..=3650))]
    pub jwt_expire_days: i64,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

// Mirrors the flag defaults above so tests can build a config with struct update syntax.
impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            hmac_key: String::new(),
            port: 5000,
            app_env: "development".to_string(),
            file_upload_path: PathBuf::from("./public"),
            max_file_upload: 1_000_000,
            rate_limit_max: 100,
            rate_limit_window_secs: 600,
            jwt_expire_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(expire_days: &str) -> Result<Config, clap::Error> {
        Config::try_parse_from([
            "devcamper",
            "--database-url",
            "postgres://localhost/devcamper",
            "--hmac-key",
            "Yabba Dabba Doo!",
            "--jwt-expire-days",
            expire_days,
        ])
    }

    #[test]
    fn token_lifetime_is_bounded() {
        assert_eq!(parse("30").unwrap().jwt_expire_days, 30);
        assert_eq!(parse("3650").unwrap().jwt_expire_days, 3650);
        assert!(parse("0").is_err());
        assert!(parse("100000000000000").is_err());
    }
}
