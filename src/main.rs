use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use party_actor_core::config::CoreConfig;
use party_actor_core::metrics::Metrics;
use party_actor_core::movement::{FlatGround, GroundProbe, MoveInput};
use party_actor_core::net::inbox::CoreEvent;
use party_actor_core::net::transport::LoopbackHub;
use party_actor_core::session::Session;
use party_actor_core::spawn::level::LevelChange;

/// Scripted input: walk in a circle and hop every couple of seconds
fn scripted_input(tick: u64, phase: f32, tick_rate: u64) -> MoveInput {
    let t = tick as f32 / tick_rate as f32 + phase;
    MoveInput::new(t.cos(), t.sin(), tick % (tick_rate * 2) == 0)
}

/// Disconnect every session and give each one tick to process it
///
/// The final tick runs teardown and flushes the despawn broadcasts.
fn disconnect_all(hub: &LoopbackHub, sessions: &mut [Session], probe: &dyn GroundProbe) {
    for session in sessions.iter() {
        hub.disconnect(session.local_participant());
    }
    for session in sessions.iter_mut() {
        session.tick(&MoveInput::default(), probe);
        info!(
            "Participant {} stopped: {:?}",
            session.local_participant(),
            session.local_actor_status()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Party Actor Host v{}", env!("CARGO_PKG_VERSION"));

    let config = CoreConfig::load_or_default();
    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e.into());
    }
    info!(
        "Configuration loaded: {} Hz, permitted levels {:?}",
        config.tick_rate, config.permitted_levels
    );

    let metrics = Arc::new(Metrics::new());

    #[cfg(feature = "metrics_http")]
    {
        let metrics_port: u16 = std::env::var("METRICS_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9090);
        let metrics_clone = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) =
                party_actor_core::metrics::start_metrics_server(metrics_clone, metrics_port).await
            {
                error!("Metrics server error: {}", e);
            }
        });
    }

    // Two participants sharing one process over the loopback hub
    let hub = LoopbackHub::new();
    let mut sessions: Vec<Session> = (0..2)
        .map(|_| {
            let mut session =
                Session::new(config.clone(), Uuid::new_v4()).with_metrics(metrics.clone());
            let transport = hub.connect(session.local_participant(), session.sender());
            session.set_transport(Arc::new(transport));
            session
        })
        .collect();

    let first_level = config
        .permitted_levels
        .iter()
        .next()
        .cloned()
        .unwrap_or_else(|| "Arena".to_string());
    hub.announce(CoreEvent::LevelChanged(LevelChange::new(None, &first_level)));

    let ground = FlatGround { height: 0.0 };
    let tick_rate = config.tick_rate as u64;
    let status_every = tick_rate * 5;

    let game_loop = async {
        let mut ticker = interval(Duration::from_secs_f32(config.dt()));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Simulation started at {} Hz", config.tick_rate);

        loop {
            ticker.tick().await;
            for (i, session) in sessions.iter_mut().enumerate() {
                let input = scripted_input(session.current_tick(), i as f32, tick_rate);
                session.tick(&input, &ground);
            }

            let tick = sessions.first().map(|s| s.current_tick()).unwrap_or(0);
            if tick % status_every == 0 {
                for session in &sessions {
                    let position = session.local_actor_state().map(|s| s.position);
                    info!(
                        "Participant {}: {:?} at {:?}, {} actors known",
                        session.local_participant(),
                        session.local_actor_status(),
                        position,
                        session.world().len()
                    );
                }
            }
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = game_loop => {}
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    disconnect_all(&hub, &mut sessions, &ground);
    info!("Host stopped");

    Ok(())
}
