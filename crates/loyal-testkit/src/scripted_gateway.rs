//! Deterministic [`AccrualGateway`] double.
//!
//! Each order number gets a queue of responses. Responses are consumed in
//! order; the last one repeats forever. Unscripted numbers answer
//! `NotRegistered`. Call times are recorded with `tokio::time::Instant`, so
//! tests running on a paused clock can assert exact backoff spacing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use loyal_accrual::{AccrualGateway, GatewayError, Verdict};
use loyal_schemas::OrderNumber;
use tokio::time::Instant;

pub type Scripted = Result<Verdict, GatewayError>;

#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<OrderNumber, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(OrderNumber, Instant)>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn script<I>(&self, number: &OrderNumber, responses: I)
    where
        I: IntoIterator<Item = Scripted>,
    {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts
            .entry(number.clone())
            .or_default()
            .extend(responses);
    }

    /// Call instants for one order, oldest first.
    pub fn calls_for(&self, number: &OrderNumber) -> Vec<Instant> {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls
            .iter()
            .filter(|(n, _)| n == number)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Highest number of concurrent `fetch_verdict` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, number: &OrderNumber) -> Scripted {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        match scripts.get_mut(number) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap_or(Err(GatewayError::NotRegistered)),
            Some(q) => q.front().cloned().unwrap_or(Err(GatewayError::NotRegistered)),
            None => Err(GatewayError::NotRegistered),
        }
    }
}

#[async_trait::async_trait]
impl AccrualGateway for ScriptedGateway {
    async fn fetch_verdict(&self, number: &OrderNumber) -> Result<Verdict, GatewayError> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push((number.clone(), Instant::now()));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let resp = self.next_response(number);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        resp
    }
}
