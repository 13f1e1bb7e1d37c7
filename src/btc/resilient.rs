//! Explorer client that spreads calls over an ordered list of endpoints.
//!
//! Endpoints are tried in priority order. Each one sits behind its own circuit
//! breaker; open endpoints are skipped, and when every endpoint is open the call
//! fails immediately with [`ExplorerError::NoAvailableEndpoint`]. Latency of
//! successful calls is tracked per endpoint.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::transport::{ExplorerRequest, ExplorerTransport, HttpTransport, TransportError};
use super::{AddressInfo, BtcExplorer, ExplorerError, ExplorerTx};
use crate::amount::Amount;

#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub endpoints: Vec<String>,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointPerformance {
    pub average_response_time: Duration,
    pub request_count: u64,
}

impl EndpointPerformance {
    fn record(&mut self, elapsed: Duration) {
        let n = self.request_count as u128;
        let avg = (self.average_response_time.as_nanos() * n + elapsed.as_nanos()) / (n + 1);
        self.average_response_time = Duration::from_nanos(avg as u64);
        self.request_count += 1;
    }
}

#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub url: String,
    pub is_healthy: bool,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub average_response_time: Duration,
    pub request_count: u64,
}

struct Endpoint {
    transport: Arc<dyn ExplorerTransport>,
    circuit: CircuitBreaker,
    performance: RwLock<EndpointPerformance>,
}

impl Endpoint {
    fn record_latency(&self, elapsed: Duration) {
        let mut perf = self
            .performance
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        perf.record(elapsed);
    }

    fn snapshot(&self) -> EndpointSnapshot {
        let circuit = self.circuit.status();
        let perf = self
            .performance
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        EndpointSnapshot {
            url: self.transport.url().to_owned(),
            is_healthy: circuit.state == CircuitState::Closed,
            state: circuit.state,
            consecutive_failures: circuit.consecutive_failures,
            last_failure_time: circuit.last_failure_time,
            average_response_time: perf.average_response_time,
            request_count: perf.request_count,
        }
    }
}

pub struct ResilientExplorer {
    endpoints: Vec<Endpoint>,
    timeout: Duration,
    retry_delay: Duration,
}

impl ResilientExplorer {
    pub fn new(cfg: &ExplorerConfig) -> Result<Self, TransportError> {
        let mut transports: Vec<Arc<dyn ExplorerTransport>> = Vec::new();
        for url in cfg.endpoints.iter() {
            transports.push(Arc::new(HttpTransport::new(url, cfg.timeout)?));
        }
        Ok(Self::with_transports(transports, cfg))
    }

    pub fn with_transports(transports: Vec<Arc<dyn ExplorerTransport>>, cfg: &ExplorerConfig) -> Self {
        let endpoints = transports
            .into_iter()
            .map(|transport| Endpoint {
                circuit: CircuitBreaker::new(transport.url(), cfg.circuit_breaker.clone()),
                transport,
                performance: RwLock::new(EndpointPerformance::default()),
            })
            .collect();
        Self {
            endpoints,
            timeout: cfg.timeout,
            retry_delay: cfg.retry_delay,
        }
    }

    async fn execute(&self, request: ExplorerRequest) -> Result<String, ExplorerError> {
        let mut attempts = 0;
        let mut last_error: Option<TransportError> = None;

        for endpoint in self.endpoints.iter() {
            if !endpoint.circuit.is_allowed() {
                continue;
            }
            if attempts > 0 && !self.retry_delay.is_zero() {
                sleep(self.retry_delay).await;
            }
            attempts += 1;

            let started = Instant::now();
            let result = tokio::time::timeout(self.timeout, endpoint.transport.send(&request))
                .await
                .unwrap_or(Err(TransportError::Timeout(self.timeout)));

            match result {
                Ok(body) => {
                    endpoint.circuit.record_success();
                    endpoint.record_latency(started.elapsed());
                    return Ok(body);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        "Explorer call failed, trying next endpoint: endpoint={} path={} error={}",
                        endpoint.transport.url(),
                        request.path(),
                        err
                    );
                    endpoint.circuit.record_failure();
                    last_error = Some(err);
                }
                Err(err) => {
                    endpoint.circuit.release_trial();
                    return Err(ExplorerError::Rejected(err));
                }
            }
        }

        match last_error {
            Some(last) => Err(ExplorerError::AllEndpointsFailed { attempts, last }),
            None => Err(ExplorerError::NoAvailableEndpoint),
        }
    }
}

#[async_trait]
impl BtcExplorer for ResilientExplorer {
    async fn get_transactions_by_address(
        &self,
        address: &str,
        cursor: Option<&str>,
    ) -> Result<Vec<ExplorerTx>, ExplorerError> {
        let path = match cursor {
            Some(last_seen) => format!("/address/{}/txs/chain/{}", address, last_seen),
            None => format!("/address/{}/txs/chain", address),
        };
        let body = self.execute(ExplorerRequest::Get(path)).await?;
        serde_json::from_str(&body).map_err(|err| ExplorerError::Decode(err.to_string()))
    }

    async fn get_balance(&self, address: &str) -> Result<Amount, ExplorerError> {
        let body = self
            .execute(ExplorerRequest::Get(format!("/address/{}", address)))
            .await?;
        let info: AddressInfo =
            serde_json::from_str(&body).map_err(|err| ExplorerError::Decode(err.to_string()))?;
        let balance = info
            .chain_stats
            .funded_txo_sum
            .saturating_sub(info.chain_stats.spent_txo_sum);
        Ok(Amount::sats(balance))
    }

    async fn send_transaction(&self, raw_tx_hex: &str) -> Result<String, ExplorerError> {
        let body = self
            .execute(ExplorerRequest::Post {
                path: "/tx".to_owned(),
                body: raw_tx_hex.to_owned(),
            })
            .await?;
        Ok(body.trim().to_owned())
    }

    fn endpoint_snapshots(&self) -> Vec<EndpointSnapshot> {
        self.endpoints.iter().map(Endpoint::snapshot).collect()
    }
}
