use powerbus_bridge::prelude::*;

use log::LevelFilter;
use std::time::Duration;

fn init_logger() {
    // everything passes the env_logger filter unless RUST_LOG narrows it;
    // the global max level does the rest
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
}

fn apply_loglevel(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    match LevelFilter::from_str(level) {
        Ok(filter) => log::set_max_level(filter),
        Err(_) => warn!("unknown loglevel {:?}, staying at info", level),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();
    init_logger();

    let config = ConfigWrapper::new(options.config_file.clone()).unwrap_or_else(|err| {
        error!("Failed to load config: {:?}", err);
        std::process::exit(255);
    });
    apply_loglevel(&config.loglevel());

    info!("using config file {}", options.config_file);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let ctrl_c = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Ctrl+C received");
        let _ = ctrl_c.send(());
    });

    if let Some(secs) = options.runtime {
        info!("stopping after {}s", secs);
        let timer = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let _ = timer.send(());
        });
    }

    powerbus_bridge::app(shutdown_rx, config).await
}
