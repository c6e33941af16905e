use anyhow::Result;
use clap::Parser;
use kube::CustomResourceExt;
use ovndb_operator::{
    application::OperatorApp,
    args::{Args, Command, LogFormat, LogArgs},
    domain::common::OperatorConfig,
    infrastructure::cluster::crd::OVNDBCluster,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logger(log: &LogArgs) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.command {
        Command::Crd => {
            print!("{}", serde_yaml::to_string(&OVNDBCluster::crd())?);
        }
        Command::Run(run) => {
            init_logger(&args.log);
            info!("starting ovndb-operator");
            OperatorApp::run(OperatorConfig::from(run)).await?;
        }
    }

    Ok(())
}
