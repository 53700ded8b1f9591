//! InfluxDB connection settings

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    pub timeout_secs: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            org: "telestore".to_string(),
            bucket: "messages".to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl InfluxConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("TELESTORE_INFLUX_URL").unwrap_or(defaults.url),
            org: std::env::var("TELESTORE_INFLUX_ORG").unwrap_or(defaults.org),
            bucket: std::env::var("TELESTORE_INFLUX_BUCKET").unwrap_or(defaults.bucket),
            token: std::env::var("TELESTORE_INFLUX_TOKEN").unwrap_or(defaults.token),
            timeout_secs: std::env::var("TELESTORE_INFLUX_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(defaults.timeout_secs),
        }
    }
}
