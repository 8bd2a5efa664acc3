//! Gateway configuration: a TOML file (optional) layered under environment
//! overrides (`MCPGW_*`), following the same `config`-crate layering every
//! crate in this workspace's ambient stack was modeled on. The out-of-scope
//! REST/DB persistence layer (spec §1, §6) is replaced here by static
//! target/policy/env-config declarations suitable for local and dev use —
//! a real deployment swaps `StaticRepository` for a database-backed one
//! without touching `mcpgw-proxy` or `mcpgw-frontend`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_mount_path() -> String {
    "/mcp".to_string()
}

fn default_session_timeout_secs() -> u64 {
    1800
}

fn default_session_cleanup_interval_secs() -> u64 {
    60
}

fn default_max_instances() -> usize {
    64
}

fn default_idle_ttl_secs() -> u64 {
    600
}

fn default_max_lifetime_secs() -> u64 {
    3600
}

fn default_gc_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_container_readiness_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceLimitsConfig {
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
}

impl Default for InstanceLimitsConfig {
    fn default() -> Self {
        Self {
            max_instances: default_max_instances(),
            idle_ttl_secs: default_idle_ttl_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            gc_interval_secs: default_gc_interval_secs(),
        }
    }
}

impl InstanceLimitsConfig {
    pub fn to_instance_manager_config(&self) -> mcpgw_instances::InstanceManagerConfig {
        mcpgw_instances::InstanceManagerConfig {
            max_instances: self.max_instances,
            idle_ttl: Duration::from_secs(self.idle_ttl_secs),
            max_lifetime: Duration::from_secs(self.max_lifetime_secs),
            gc_interval: Duration::from_secs(self.gc_interval_secs),
        }
    }
}

/// Mirrors `mcpgw_repository::TransportKind`, as a string the config file
/// can spell out.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKindConfig {
    Http,
    EventStream,
    Process,
    Container,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatefulnessConfig {
    #[default]
    Stateless,
    Stateful,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationConfig {
    #[default]
    Shared,
    PerRole,
    PerGroup,
    PerUser,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthKindConfig {
    #[default]
    None,
    Bearer,
    NamedHeader,
}

/// A statically-declared upstream, for local/dev use in place of the
/// out-of-scope target CRUD surface (spec §1, §3).
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub transport: TransportKindConfig,
    #[serde(default)]
    pub http_address: Option<String>,
    #[serde(default)]
    pub process_command: Option<String>,
    #[serde(default)]
    pub process_args: Vec<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub container_port: Option<u16>,
    #[serde(default)]
    pub container_health_probe_path: Option<String>,
    #[serde(default)]
    pub container_command: Option<String>,
    #[serde(default)]
    pub container_args: Vec<String>,
    #[serde(default)]
    pub statefulness: StatefulnessConfig,
    #[serde(default)]
    pub isolation: IsolationConfig,
    #[serde(default)]
    pub auth_kind: AuthKindConfig,
    #[serde(default)]
    pub auth_header_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Plaintext fallback credential (spec §4.I default scope); encrypted
    /// with the gateway's encryption key at load time before it is ever
    /// held as a `Target.default_credential` blob.
    #[serde(default)]
    pub default_credential: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A statically-declared authorization rule (spec §3 Policy/Subject). The
/// default-deny evaluator (spec §4.H) needs at least one `Allow` policy per
/// resource a caller should reach — there is no implicit "everyone can do
/// everything" fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default = "default_resource_kind")]
    pub resource_kind: String,
    #[serde(default)]
    pub resource_name_regex: Option<String>,
    #[serde(default = "default_effect")]
    pub effect: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Each entry is `everyone`, `role:<name>`, `group:<name>`, or `user:<id>`.
    pub subjects: Vec<String>,
}

fn default_resource_kind() -> String {
    "all".to_string()
}

fn default_effect() -> String {
    "allow".to_string()
}

/// A statically-declared env/credential entry (spec §3, §4.I). `value` is
/// plaintext in the config file and is encrypted with the gateway's
/// encryption key when loaded into the repository.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvConfigEntryConfig {
    pub target_name: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub scope_value: Option<String>,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_scope() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_session_cleanup_interval_secs")]
    pub session_cleanup_interval_secs: u64,
    #[serde(default)]
    pub process_manager: InstanceLimitsConfig,
    #[serde(default)]
    pub container_manager: InstanceLimitsConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub client_request_timeout_secs: u64,
    #[serde(default = "default_container_readiness_timeout_secs")]
    pub container_readiness_timeout_secs: u64,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
    #[serde(default)]
    pub env_config: Vec<EnvConfigEntryConfig>,
}

impl GatewayConfig {
    /// Load from an optional TOML file, then apply `MCPGW__`-prefixed
    /// environment overrides (double underscore as the nested-key
    /// separator, since single underscore collides with our own field
    /// names like `listen_addr`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        builder = builder.add_source(Environment::with_prefix("MCPGW").separator("__"));
        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_with_no_file_and_no_env() {
        let config = GatewayConfig::load(None).expect("default config loads");
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.session_timeout_secs, 1800);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn loads_targets_and_policies_from_a_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            listen_addr = "0.0.0.0:9000"

            [[targets]]
            name = "github"
            transport = "http"
            http_address = "https://github-mcp.internal"

            [[policies]]
            name = "allow-everyone"
            subjects = ["everyone"]
            "#
        )
        .unwrap();

        let config = GatewayConfig::load(Some(file.path())).expect("config loads from file");
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].name, "github");
        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.policies[0].resource_kind, "all");
        assert_eq!(config.policies[0].effect, "allow");
    }

    #[test]
    #[serial_test::serial(mcpgw_env)]
    fn environment_overrides_take_precedence_over_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "listen_addr = \"0.0.0.0:9000\"").unwrap();

        std::env::set_var("MCPGW__LISTEN_ADDR", "127.0.0.1:1234");
        let result = GatewayConfig::load(Some(file.path()));
        std::env::remove_var("MCPGW__LISTEN_ADDR");

        assert_eq!(result.unwrap().listen_addr, "127.0.0.1:1234");
    }
}
