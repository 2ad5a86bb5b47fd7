//! The provisioning configuration collected once per run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    errors::{DeployError, Result},
    validate,
};

macro_rules! validated_string {
    ($(#[$meta:meta])* $name:ident, $field:literal, $check:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = DeployError;

            fn try_from(value: String) -> Result<Self> {
                $check(&value).map_err(|message| DeployError::validation($field, message))?;
                Ok(Self(value))
            }
        }

        impl TryFrom<&str> for $name {
            type Error = DeployError;

            fn try_from(value: &str) -> Result<Self> {
                Self::try_from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

validated_string!(
    /// Identifier used as OS username, directory name and unit name.
    CodeName,
    "code name",
    validate::code_name
);
validated_string!(Domain, "domain", validate::domain);
validated_string!(RepositoryUrl, "repository URL", validate::repository_url);
validated_string!(
    /// `CPUQuota=` value, always rendered with its `%` suffix.
    CpuQuota,
    "CPU quota",
    validate::percentage
);
validated_string!(MemorySize, "size", validate::size);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Node,
    #[serde(alias = "python")]
    Fastapi,
}

impl Runtime {
    pub fn label(self) -> &'static str {
        match self {
            Runtime::Node => "Node.js",
            Runtime::Fastapi => "FastAPI",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Access token that never prints, serializes or logs its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: Secret,
}

impl Credentials {
    /// Reads `APPFORGE_GIT_USERNAME` / `APPFORGE_GIT_TOKEN`; both must be set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("APPFORGE_GIT_USERNAME").ok()?;
        let token = std::env::var("APPFORGE_GIT_TOKEN").ok()?;
        if username.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self {
            username,
            token: Secret::new(token),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeKnobs {
    pub gzip_level: u8,
    pub keepalive_timeout: u32,
    pub client_max_body_size: MemorySize,
    pub node_version: String,
    pub entry_point: String,
    pub app_module: String,
}

impl Default for RuntimeKnobs {
    fn default() -> Self {
        Self {
            gzip_level: 6,
            keepalive_timeout: 65,
            client_max_body_size: MemorySize("10M".into()),
            node_version: "lts/*".into(),
            entry_point: "index.js".into(),
            app_module: "main:app".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub display_name: String,
    pub code_name: CodeName,
    pub repository: RepositoryUrl,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    pub domain: Domain,
    pub runtime: Runtime,
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default)]
    pub nice: i8,
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: CpuQuota,
    #[serde(default = "default_memory_max")]
    pub memory_max: MemorySize,
    #[serde(default)]
    pub knobs: RuntimeKnobs,
}

pub fn default_workers() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);
    cores * 2 + 1
}

pub fn default_concurrency() -> u32 {
    1000
}

pub fn default_backlog() -> u32 {
    2048
}

pub fn default_cpu_quota() -> CpuQuota {
    CpuQuota("80%".into())
}

pub fn default_memory_max() -> MemorySize {
    MemorySize("1G".into())
}

impl ProvisioningConfig {
    /// Range checks the newtypes cannot express on their own. Called after
    /// loading an answers file and after interactive collection.
    pub fn validate(&self) -> Result<()> {
        let check = |field: &str, outcome: validate::Validation| {
            outcome.map_err(|message| DeployError::validation(field, message))
        };
        check("application name", validate::display_name(&self.display_name))?;
        check("port", validate::port(&self.port.to_string()))?;
        check("nice value", validate::nice(&self.nice.to_string()))?;
        check("workers", validate::positive_integer(&self.workers.to_string()))?;
        check("concurrency", validate::positive_integer(&self.concurrency.to_string()))?;
        check("backlog", validate::positive_integer(&self.backlog.to_string()))?;
        check("gzip level", validate::gzip_level(&self.knobs.gzip_level.to_string()))?;
        check(
            "keepalive timeout",
            validate::positive_integer(&self.knobs.keepalive_timeout.to_string()),
        )?;
        match self.runtime {
            Runtime::Node => {
                check("node version", validate::node_version(&self.knobs.node_version))?;
                check("entry point", validate::project_path(&self.knobs.entry_point))?;
            }
            Runtime::Fastapi => {
                check("app module", validate::app_module(&self.knobs.app_module))?;
            }
        }
        Ok(())
    }

    /// Parses and validates a JSON answers file.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: ProvisioningConfig = serde_json::from_str(raw)
            .map_err(|err| DeployError::validation("answers file", err.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_file_fills_defaults() {
        let config = ProvisioningConfig::from_json(
            r#"{
                "display_name": "Demo App",
                "code_name": "demoapp",
                "repository": "https://github.com/acme/demo.git",
                "domain": "demo.example.com",
                "runtime": "node",
                "port": 8080
            }"#,
        )
        .expect("valid answers");

        assert_eq!(config.code_name.as_str(), "demoapp");
        assert_eq!(config.nice, 0);
        assert_eq!(config.cpu_quota.as_str(), "80%");
        assert_eq!(config.memory_max.as_str(), "1G");
        assert_eq!(config.knobs.gzip_level, 6);
        assert!(config.workers >= 3);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn answers_file_rejects_bad_code_name_and_port() {
        let bad_name = r#"{"display_name":"x","code_name":"Root!","repository":"https://github.com/a/b",
            "domain":"a.example","runtime":"node","port":8080}"#;
        assert!(ProvisioningConfig::from_json(bad_name).is_err());

        let bad_port = r#"{"display_name":"x","code_name":"demo","repository":"https://github.com/a/b",
            "domain":"a.example","runtime":"fastapi","port":80}"#;
        let err = ProvisioningConfig::from_json(bad_port).expect_err("port 80 is privileged");
        assert!(matches!(err, DeployError::Validation { ref field, .. } if field == "port"));
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let creds = Credentials {
            username: "octo".into(),
            token: Secret::new("ghp_supersecret"),
        };
        let printed = format!("{creds:?}");
        assert!(printed.contains("octo"));
        assert!(!printed.contains("ghp_supersecret"));
    }
}
