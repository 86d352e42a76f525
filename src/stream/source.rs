//! Upstream event source: the single owned connection to the sensor gateway.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::stream::StreamError;

/// Boundary to the sensor gateway. Production wires TCP; tests inject a
/// scripted source to drive disconnects and malformed payloads.
#[async_trait]
pub trait EventSource: Send {
    /// Establish (or re-establish) the upstream connection.
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Next raw event line. `Ok(None)` means the upstream closed cleanly;
    /// either way the caller re-enters the reconnect path.
    async fn next_event(&mut self) -> Result<Option<String>, StreamError>;
}

/// Newline-delimited JSON over TCP, the gateway's push protocol.
pub struct TcpEventSource {
    address: String,
    framed: Option<Framed<TcpStream, LinesCodec>>,
}

impl TcpEventSource {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            framed: None,
        }
    }
}

#[async_trait]
impl EventSource for TcpEventSource {
    async fn connect(&mut self) -> anyhow::Result<()> {
        let stream = TcpStream::connect(&self.address).await?;
        self.framed = Some(Framed::new(stream, LinesCodec::new()));
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<String>, StreamError> {
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| StreamError::Disconnected("not connected".to_string()))?;

        match framed.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => {
                self.framed = None;
                Err(StreamError::Disconnected(e.to_string()))
            }
            None => {
                self.framed = None;
                Ok(None)
            }
        }
    }
}

/// Exponential backoff with jitter for the reconnect path.
///
/// Delays double from `initial` up to `max`; each delay gets +-10% jitter so
/// a fleet of aggregators doesn't hammer a recovering gateway in lockstep.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to sleep before the next attempt; doubles for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let jitter = rand::thread_rng().gen_range(0.9..1.1);
        base.mul_f64(jitter)
    }

    /// Back to the initial delay, after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

        // Jitter is +-10%, so compare against generous bounds.
        let d1 = backoff.next_delay();
        assert!(d1 >= Duration::from_millis(900) && d1 <= Duration::from_millis(1100));

        let d2 = backoff.next_delay();
        assert!(d2 >= Duration::from_millis(1800) && d2 <= Duration::from_millis(2200));

        let d3 = backoff.next_delay();
        assert!(d3 >= Duration::from_millis(3600) && d3 <= Duration::from_millis(4400));

        // Run it out: must never exceed the cap plus jitter.
        for _ in 0..10 {
            let d = backoff.next_delay();
            assert!(d <= Duration::from_secs(33));
        }
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let d = backoff.next_delay();
        assert!(d <= Duration::from_millis(1100));
    }
}
