use std::collections::HashMap;

use clap::Parser;
use mmin::cli::{parse_headers, Cli};
use mmin::config::RunConfig;

fn init_logging(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("mmin=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if cli.is_remote {
        if let Err(e) = mmin::control_server::ControlServer::new().serve(cli.port).await {
            tracing::error!(error = %e, "remote server failed");
            std::process::exit(1);
        }
        return;
    }

    if cli.web {
        if let Err(e) = mmin::control_server::ControlServer::new().serve(cli.port).await {
            tracing::error!(error = %e, "control server failed");
            std::process::exit(1);
        }
        return;
    }

    let conf = match build_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = conf.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let result = if conf.remote_server.is_empty() {
        mmin::controller::run(conf).await.map(|_| ())
    } else {
        mmin::remote::run(&conf).await
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn build_config(cli: &Cli) -> mmin::error::Result<RunConfig> {
    if let Some(path) = &cli.conf {
        return RunConfig::from_file(path);
    }

    let url = cli.url.clone().ok_or_else(|| {
        mmin::error::Error::Config("either --conf or --url must be given".to_string())
    })?;

    let headers: HashMap<String, String> = parse_headers(&cli.headers);
    let (group, http_conf) = mmin::uri::derive_single_target(
        &url,
        &cli.method,
        &cli.body,
        headers,
        cli.req_thread,
        cli.max_qps,
        cli.max_request,
    )?;

    Ok(RunConfig {
        run_time: cli.run_time,
        debug: cli.debug,
        remote_server: HashMap::new(),
        params: Vec::new(),
        tcp_groups: vec![group],
        http_confs: vec![http_conf],
    })
}
