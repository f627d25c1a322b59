use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info};
use invernadero::{GreenhouseSession, Result, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let Some(address) = std::env::args().nth(1) else {
        error!("Usage: apply_settings <device address>");
        return Ok(());
    };

    info!("🌱 Invernadero Apply Settings Example");

    let session = GreenhouseSession::ble().await?;
    let mut state = session.connection_state();

    session.connect(address.clone());
    let connected = timeout(Duration::from_secs(40), state.wait_for(|s| s.is_connected()))
        .await
        .map(|reached| reached.is_ok());
    if !matches!(connected, Ok(true)) {
        error!("❌ Could not connect to {}", address);
        return Ok(());
    }

    // Wait for the device to report its current settings
    let mut current = session.current_settings();
    if timeout(Duration::from_secs(5), current.changed()).await.is_ok() {
        let settings = *current.borrow_and_update();
        info!("📋 Device settings: {:?}", settings);
    }

    let settings = Settings {
        expected_light_minutes: 120,
        min_light: 10.0,
        max_light: 90.0,
        min_humidity: 0.0,
        max_humidity: 100.0,
        min_soil_humidity: 0.0,
        max_soil_humidity: 100.0,
        min_temperature: 15.0,
        max_temperature: 35.0,
    };

    info!("📤 Sending new settings...");
    match session.set_settings(settings).await {
        Ok(()) => info!("✅ Settings sent"),
        Err(e) => {
            error!("❌ Failed to send settings: {}", e);
            session.disconnect().await.ok();
            return Err(e);
        }
    }

    // Ask for the settings back and give the device time to answer
    session.request_settings_refresh().await?;
    sleep(Duration::from_secs(2)).await;

    let confirmed = *session.current_settings().borrow();
    if confirmed == settings {
        info!("✅ Device confirmed the new settings");
    } else {
        error!("❌ Device reports different settings: {:?}", confirmed);
    }

    session.disconnect().await.ok();
    info!("👋 Done");

    Ok(())
}
