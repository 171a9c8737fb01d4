use eyre::WrapErr;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub signatures: SignatureConfig,
    #[serde(default)]
    pub documents: DocumentConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignatureConfig {
    pub grant_expiry_hours: u32,
    pub require_admin_signature: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        SignatureConfig {
            grant_expiry_hours: 72,
            require_admin_signature: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentConfig {
    pub prefix: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        DocumentConfig {
            prefix: "documents".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReminderConfig {
    pub signature_after_days: u32,
    pub acceptance_after_days: u32,
    pub deadline_days_before: u32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        ReminderConfig {
            signature_after_days: 3,
            acceptance_after_days: 2,
            deadline_days_before: 3,
        }
    }
}

impl Config {
    pub fn load(file_name: &str) -> eyre::Result<Config> {
        let content = std::fs::read_to_string(file_name)
            .wrap_err_with(|| format!("cannot load configuration file {file_name}"))?;
        Config::parse(&content).wrap_err_with(|| format!("cannot parse configuration file {file_name}"))
    }

    pub fn parse(content: &str) -> eyre::Result<Config> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("[database]\nurl = \"sqlite::memory:\"\n").unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.signatures.grant_expiry_hours, 72);
        assert!(config.signatures.require_admin_signature);
        assert_eq!(config.documents.prefix, "documents");
        assert_eq!(config.reminders.signature_after_days, 3);
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse(
            r#"
            [database]
            url = "mysql://monitoria@localhost/monitoria"

            [signatures]
            require_admin_signature = false

            [reminders]
            acceptance_after_days = 5
            "#,
        )
        .unwrap();
        assert!(!config.signatures.require_admin_signature);
        assert_eq!(config.signatures.grant_expiry_hours, 72);
        assert_eq!(config.reminders.acceptance_after_days, 5);
        assert_eq!(config.reminders.deadline_days_before, 3);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(Config::parse("[database]\nurl = \"x\"\nuser = \"y\"\n").is_err());
        assert!(Config::parse("[signatures]\ngrant_expiry_hours = 1\n").is_err());
    }
}
