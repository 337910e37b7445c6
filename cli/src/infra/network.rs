//! Network infrastructure: implements `ReachabilityProbe` with a bounded
//! TCP connect from the operator's side.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::application::ports::{ProbeResult, ReachabilityProbe};

pub struct TcpProbe;

impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> ProbeResult {
        let result = match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(_)) => ProbeResult::Open,
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => ProbeResult::Refused,
            Ok(Err(e)) => {
                debug!(error = %e, "connect failed");
                ProbeResult::Filtered
            }
            Err(_) => ProbeResult::Filtered,
        };
        debug!(address, port, ?result, "probed");
        result
    }
}
