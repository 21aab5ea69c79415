use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use turnstile::api;
use turnstile::logger::*;
use turnstile::server::*;
use turnstile::settings::*;
use warp::Filter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let project_settings = parse_settings(cli.settings.as_deref())?;

    let logger = Logger::new_bootstrap(project_settings.log.format)?;
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;
    info!(service = ?cli.service, "starting");

    let address: SocketAddr = project_settings.http.address.parse()?;
    let server = Arc::new(Server::try_new(&project_settings, cli.service).await?);

    let api_v1 = warp::path("api")
        .and(warp::path("v1"))
        .and(api::v1::routes(server.clone()))
        .recover(api::v1::recover_error)
        .with(warp::trace::request());

    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("could not listen for SIGINT: {}", e);
        }
    };

    match &project_settings.http.tls {
        Some(tls) => {
            for path in [&tls.cert_path, &tls.key_path] {
                if !std::fs::metadata(path)?.is_file() {
                    return Err(anyhow::anyhow!("TLS file is not a regular file: {:?}", path));
                }
            }
            let (bound, serving) = warp::serve(api_v1)
                .tls()
                .cert_path(&tls.cert_path)
                .key_path(&tls.key_path)
                .bind_with_graceful_shutdown(address, shutdown_signal);
            info!(%bound, "listening with TLS");
            serving.await;
        }
        None => {
            let (bound, serving) =
                warp::serve(api_v1).try_bind_with_graceful_shutdown(address, shutdown_signal)?;
            info!(%bound, "listening");
            serving.await;
        }
    }

    let shutdown_timeout = std::time::Duration::from_secs(30);
    match tokio::time::timeout(shutdown_timeout, server.shutdown()).await {
        Ok(_) => info!("server shutdown successfully"),
        Err(_) => error!("server shutdown timed out"),
    }

    Ok(())
}
