use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};
use invernadero::{ConnectionState, GreenhouseSession, Result, SensorChannel, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let Some(address) = std::env::args().nth(1) else {
        error!("Usage: greenhouse_monitor <device address>");
        return Ok(());
    };

    info!("🌱 Invernadero Greenhouse Monitor Example");

    let connector = invernadero::BleConnector::new().await?;
    let config = SessionConfig {
        auto_reconnect: true,
        ..SessionConfig::default()
    };
    let session = GreenhouseSession::with_config(std::sync::Arc::new(connector), config);

    let mut state = session.connection_state();
    session.connect(address.clone());

    let connected = timeout(
        Duration::from_secs(40),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .map(|reached| reached.is_ok());
    if !matches!(connected, Ok(true)) {
        error!("❌ Could not connect to {}", address);
        return Ok(());
    }
    info!("✅ Connected to {}", address);
    info!("Press Ctrl+C to stop monitoring");

    let mut values = session.current_values();
    let mut information = session.current_information();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("🔌 Connection: {}", *state.borrow_and_update());
            }
            changed = values.changed() => {
                if changed.is_err() {
                    break;
                }
                let sample = *values.borrow_and_update();
                println!(
                    "☀️ {:7.1}  💧 {:5.1}%  🪴 {:5.1}%  🌡️ {:5.1}°C",
                    sample.light, sample.humidity, sample.soil_humidity, sample.temperature
                );
            }
            changed = information.changed() => {
                if changed.is_err() {
                    break;
                }
                let info = *information.borrow_and_update();
                for channel in SensorChannel::ALL {
                    if info.errors(channel) > 0 {
                        warn!("⚠️ {} sensor reported {} errors", channel, info.errors(channel));
                    }
                }
            }
        }
    }

    info!("🔌 Disconnecting...");
    if session.disconnect().await.is_err() {
        warn!("Disconnect task did not complete");
    }

    let settings = *session.current_settings().borrow();
    info!(
        "Last known settings: {} min of light, {:.1}-{:.1}°C",
        settings.expected_light_minutes, settings.min_temperature, settings.max_temperature
    );

    Ok(())
}
