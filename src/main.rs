use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info};

use orderflow_api::{
    config, db,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        notifications::{EmailChannel, NotificationDispatcher, SmsChannel},
        payments::{HttpPaymentGateway, PaymentGateway},
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!(
        environment = %cfg.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Starting orderflow-api"
    );

    let db = Arc::new(db::establish_connection_from_app_config(&cfg).await?);
    if cfg.auto_migrate {
        db::ensure_schema(&db).await?;
    }

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = EventSender::new(event_tx);

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(EmailChannel::new(cfg.notification_email_endpoint.clone())),
        Some(Arc::new(SmsChannel::new(
            cfg.notification_sms_endpoint.clone(),
        ))),
    ));
    tokio::spawn(events::process_events(event_rx, db.clone(), dispatcher));

    let gateway: Option<Arc<dyn PaymentGateway>> = cfg
        .payment_gateway_url
        .clone()
        .map(|url| Arc::new(HttpPaymentGateway::new(url)) as Arc<dyn PaymentGateway>);
    if gateway.is_none() {
        info!("No payment gateway configured; gateway checkouts are disabled");
    }

    let services = Arc::new(AppServices::new(
        db.clone(),
        &cfg,
        event_sender.clone(),
        gateway,
    )?);

    if cfg.pending_payment_timeout_mins > 0 {
        let state_machine = services.state_machine.clone();
        let timeout_mins = cfg.pending_payment_timeout_mins;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let cutoff = Utc::now() - chrono::Duration::minutes(timeout_mins);
                match state_machine.reap_abandoned(cutoff).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Reaped abandoned orders"),
                    Err(e) => error!(error = %e, "Abandoned order reaper failed"),
                }
            }
        });
    }

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let state = AppState {
        db,
        config: Arc::new(cfg),
        event_sender,
        services,
    };
    let app = orderflow_api::app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
