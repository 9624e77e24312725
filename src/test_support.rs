use std::{collections::HashMap, sync::Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    domain::{audience::CustomerProfile, ids::CustomerId, message::MessageContent},
    engine::clock::Clock,
    usecases::contracts::{
        CustomerDirectory, DirectorySourceError, OutboundRequest, OutboundTransport,
        TransportError,
    },
};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .expect("valid base time")
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(base_time()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().expect("clock lock") += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// Customer created 100 days before [`base_time`], last active `active_ago`
/// before it.
pub fn profile(id: &str, active_ago: Option<Duration>) -> CustomerProfile {
    CustomerProfile {
        id: CustomerId::new(id),
        display_name: format!("Customer {id}"),
        created_at: base_time() - Duration::days(100),
        last_active_at: active_ago.map(|ago| base_time() - ago),
        opted_out: false,
    }
}

#[derive(Debug)]
pub struct StubDirectory {
    result: Result<Vec<CustomerProfile>, DirectorySourceError>,
    calls: Mutex<usize>,
}

impl StubDirectory {
    pub fn with_profiles(profiles: Vec<CustomerProfile>) -> Self {
        Self {
            result: Ok(profiles),
            calls: Mutex::new(0),
        }
    }

    pub fn failing(error: DirectorySourceError) -> Self {
        Self {
            result: Err(error),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().expect("calls lock")
    }
}

impl CustomerDirectory for StubDirectory {
    fn customers(&self) -> Result<Vec<CustomerProfile>, DirectorySourceError> {
        *self.calls.lock().expect("calls lock") += 1;
        self.result.clone()
    }
}

/// Transport that succeeds unless a failure was scripted for the customer.
/// Scripted failures are consumed one per attempt.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    failures: Mutex<HashMap<CustomerId, Vec<TransportError>>>,
    sent: Mutex<Vec<(CustomerId, MessageContent)>>,
    attempts: Mutex<HashMap<CustomerId, usize>>,
}

impl ScriptedTransport {
    pub fn fail(&self, customer: &str, errors: Vec<TransportError>) {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(CustomerId::new(customer), errors);
    }

    pub fn sent(&self) -> Vec<(CustomerId, MessageContent)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn attempts(&self, customer: &str) -> usize {
        self.attempts
            .lock()
            .expect("attempts lock")
            .get(&CustomerId::new(customer))
            .copied()
            .unwrap_or(0)
    }
}

impl OutboundTransport for ScriptedTransport {
    fn send(&self, request: &OutboundRequest<'_>) -> Result<(), TransportError> {
        *self
            .attempts
            .lock()
            .expect("attempts lock")
            .entry(request.customer.clone())
            .or_default() += 1;

        let scripted = {
            let mut failures = self.failures.lock().expect("failures lock");
            match failures.get_mut(request.customer) {
                Some(errors) if !errors.is_empty() => Some(errors.remove(0)),
                _ => None,
            }
        };
        if let Some(error) = scripted {
            return Err(error);
        }

        self.sent
            .lock()
            .expect("sent lock")
            .push((request.customer.clone(), request.content.clone()));
        Ok(())
    }
}
