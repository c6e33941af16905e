use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::common::{
    Environment, ImageDefaults, OVN_NB_CONTAINER_IMAGE, OVN_SB_CONTAINER_IMAGE, OperatorConfig,
    backoff::BackoffPolicy,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "ovndb-operator")]
#[command(about = "Reconciles OVNDBCluster resources into replicated OVSDB RAFT clusters")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the controller against the current kubeconfig context
    Run(RunArgs),
    /// Print the OVNDBCluster CustomResourceDefinition as YAML
    Crd,
}

#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    /// Default directive when RUST_LOG is unset
    #[arg(long = "log-filter", env = "LOG_FILTER", default_value = "info")]
    pub filter: String,

    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AppEnv {
    Test,
    Development,
    Production,
}

impl From<AppEnv> for Environment {
    fn from(env: AppEnv) -> Self {
        match env {
            AppEnv::Test => Environment::Test,
            AppEnv::Development => Environment::Development,
            AppEnv::Production => Environment::Production,
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    #[arg(long, env = "ENV", value_enum, default_value_t = AppEnv::Production)]
    pub env: AppEnv,

    /// Only watch clusters in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[arg(
        long,
        env = "RELATED_IMAGE_OVN_NB_DBCLUSTER_IMAGE_URL_DEFAULT",
        default_value = OVN_NB_CONTAINER_IMAGE
    )]
    pub nb_image: String,

    #[arg(
        long,
        env = "RELATED_IMAGE_OVN_SB_DBCLUSTER_IMAGE_URL_DEFAULT",
        default_value = OVN_SB_CONTAINER_IMAGE
    )]
    pub sb_image: String,

    /// Upper bound for any single call to the platform, in seconds
    #[arg(long, env = "CALL_TIMEOUT_SECONDS", default_value_t = 30)]
    pub call_timeout_seconds: u64,

    /// Resync interval for converged clusters, in seconds
    #[arg(long, env = "REQUEUE_SECONDS", default_value_t = 60)]
    pub requeue_seconds: u64,

    /// Requeue interval while a cluster is converging, in seconds
    #[arg(long, env = "PROGRESS_SECONDS", default_value_t = 5)]
    pub progress_seconds: u64,

    #[arg(long, env = "BACKOFF_BASE_SECONDS", default_value_t = 1)]
    pub backoff_base_seconds: u64,

    #[arg(long, env = "BACKOFF_MAX_SECONDS", default_value_t = 300)]
    pub backoff_max_seconds: u64,

    /// How long members may fail their probes before the cluster is flagged degraded
    #[arg(long, env = "PROBE_GRACE_SECONDS", default_value_t = 120)]
    pub probe_grace_seconds: i64,
}

impl From<&RunArgs> for OperatorConfig {
    fn from(args: &RunArgs) -> Self {
        OperatorConfig {
            env: args.env.into(),
            images: ImageDefaults {
                nb: args.nb_image.clone(),
                sb: args.sb_image.clone(),
            },
            call_timeout: Duration::from_secs(args.call_timeout_seconds),
            requeue_interval: Duration::from_secs(args.requeue_seconds),
            progress_interval: Duration::from_secs(args.progress_seconds),
            backoff: BackoffPolicy {
                base: Duration::from_secs(args.backoff_base_seconds),
                max: Duration::from_secs(args.backoff_max_seconds),
            },
            probe_grace: chrono::Duration::seconds(args.probe_grace_seconds),
            watch_namespace: args.watch_namespace.clone().filter(|ns| !ns.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults_match_operator_defaults() {
        let args = Args::try_parse_from(["ovndb-operator", "run"]).unwrap();
        let Command::Run(run) = &args.command else {
            panic!("Expected run subcommand");
        };

        let config = OperatorConfig::from(run);
        let defaults = OperatorConfig::default();

        assert_eq!(config.call_timeout, defaults.call_timeout);
        assert_eq!(config.requeue_interval, defaults.requeue_interval);
        assert_eq!(config.progress_interval, defaults.progress_interval);
        assert_eq!(config.backoff, defaults.backoff);
        assert_eq!(config.probe_grace, defaults.probe_grace);
        assert_eq!(args.log.format, LogFormat::Text);
    }

    #[test]
    fn test_flags_override_images_and_namespace() {
        let args = Args::try_parse_from([
            "ovndb-operator",
            "--log-format",
            "json",
            "run",
            "--nb-image",
            "registry.local/nb:1",
            "--watch-namespace",
            "openstack",
        ])
        .unwrap();
        let Command::Run(run) = &args.command else {
            panic!("Expected run subcommand");
        };

        let config = OperatorConfig::from(run);

        assert_eq!(config.images.nb, "registry.local/nb:1");
        assert_eq!(config.images.sb, OVN_SB_CONTAINER_IMAGE);
        assert_eq!(config.watch_namespace.as_deref(), Some("openstack"));
        assert_eq!(args.log.format, LogFormat::Json);
    }

    #[test]
    fn test_crd_subcommand() {
        let args = Args::try_parse_from(["ovndb-operator", "crd"]).unwrap();
        assert!(matches!(args.command, Command::Crd));
    }
}
