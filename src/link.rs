use async_trait::async_trait;
use futures::stream::BoxStream;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// Raw notification payloads in the order the platform delivered them
///
/// The stream ending means the link is gone.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// An established link to one device
///
/// Together with [`Connector`] this is the platform surface the session consumes.
/// [`crate::ble`] implements both over btleplug.
#[async_trait]
pub trait Link: Send + Sync {
    /// Perform one physical write of `data`
    ///
    /// # Errors
    ///
    /// Returns a connection error if the link dropped.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Subscribe to inbound notifications
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the subscription.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Tear the link down
    ///
    /// # Errors
    ///
    /// Returns an error if the platform reports a failure, including when the
    /// link was already lost.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the platform still considers the link up
    ///
    /// Checked before every periodic poll, so a link that drops without ending
    /// its notification stream is still noticed.
    async fn is_connected(&self) -> bool;
}

/// Opens links to devices by address
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the device at `address`
    ///
    /// # Errors
    ///
    /// Returns [`crate::GreenhouseError::DeviceNotFound`] or
    /// [`crate::GreenhouseError::ConnectionFailed`] when no link could be established.
    async fn connect(&self, address: &str) -> Result<Arc<dyn Link>>;
}

/// Single-writer gate in front of a [`Link`]
///
/// At most one physical write is outstanding at a time and each successful write
/// is followed by the settle delay while the gate is still held. The gate is an
/// RAII guard, so it is released on every exit path including errors and
/// cancellation of the sending future.
pub struct LinkSerializer {
    link: Arc<dyn Link>,
    gate: Mutex<()>,
    settle: Duration,
}

impl LinkSerializer {
    /// Create a serializer for `link` with the given settle delay
    #[must_use]
    pub fn new(link: Arc<dyn Link>, settle: Duration) -> Self {
        Self {
            link,
            gate: Mutex::new(()),
            settle,
        }
    }

    /// Write `frame` once the link is free, then hold it for the settle delay
    ///
    /// # Errors
    ///
    /// Returns the link's write error after the gate is released. No retry.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        let _gate = self.gate.lock().await;

        debug!("Sending frame: {:02X?}", frame);
        self.link.write(frame).await?;

        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    /// The link behind this serializer
    #[must_use]
    pub const fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockLink;
    use super::*;
    use crate::error::GreenhouseError;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    const SETTLE: Duration = Duration::from_millis(200);
    const LATENCY: Duration = Duration::from_millis(50);

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sends_are_serialized() {
        let link = MockLink::with_latency(LATENCY);
        let serializer = Arc::new(LinkSerializer::new(link.clone(), SETTLE));

        let handles: Vec<_> = [b"V", b"S", b"I"]
            .into_iter()
            .map(|frame| {
                let serializer = Arc::clone(&serializer);
                tokio::spawn(async move { serializer.send(frame).await })
            })
            .collect();

        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        let writes = link.writes();
        assert_eq!(writes.len(), 3);
        assert!(!link.overlapped());
        for pair in writes.windows(2) {
            assert!(pair[1].start >= pair[0].start + LATENCY + SETTLE);
            assert!(pair[1].start >= pair[0].end + SETTLE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_holds_settle_delay() {
        let link = MockLink::new();
        let serializer = LinkSerializer::new(link.clone(), SETTLE);

        let started = Instant::now();
        assert_ok!(serializer.send(b"V").await);
        assert!(started.elapsed() >= SETTLE);
        assert_eq!(link.written_tags(), vec![b'V']);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_releases_gate() {
        let link = MockLink::new();
        let serializer = LinkSerializer::new(link.clone(), SETTLE);

        link.fail_writes(true);
        let error = assert_err!(serializer.send(b"V").await);
        assert!(matches!(error, GreenhouseError::Disconnected));

        link.fail_writes(false);
        assert_ok!(serializer.send(b"S").await);
        assert_eq!(link.written_tags(), vec![b'S']);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_send_releases_gate() {
        let link = MockLink::with_latency(Duration::from_secs(10));
        let serializer = Arc::new(LinkSerializer::new(link.clone(), SETTLE));

        let stuck = {
            let serializer = Arc::clone(&serializer);
            tokio::spawn(async move { serializer.send(b"V").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        stuck.abort();
        assert!(stuck.await.unwrap_err().is_cancelled());

        let completed = tokio::time::timeout(Duration::from_secs(20), serializer.send(b"I")).await;
        assert_ok!(assert_ok!(completed));
        assert_eq!(link.written_tags(), vec![b'I']);
        assert!(!link.overlapped());
    }
}
