#![allow(dead_code)]

use cqrs_repository::es::inmemory::InMemoryPersist;
use cqrs_repository::{
    Aggregate, AggregateFactory, AggregateRoot, CqrsError, Event, EventEnvelope, EventStore,
    EventStream, Snapshottable,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Barrier;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccountError {
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },
    #[error("Account is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountEvent {
    Opened { owner: String },
    Deposited { amount: i64 },
    Withdrawn { amount: i64 },
    Closed,
}

impl Event for AccountEvent {
    fn event_type(&self) -> String {
        match self {
            AccountEvent::Opened { .. } => "AccountOpened".to_string(),
            AccountEvent::Deposited { .. } => "Deposited".to_string(),
            AccountEvent::Withdrawn { .. } => "Withdrawn".to_string(),
            AccountEvent::Closed => "AccountClosed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner: String,
    pub currency: String,
    pub balance: i64,
    pub movements: Vec<i64>,
    pub closed: bool,
}

impl Aggregate for Account {
    const TYPE: &'static str = "ACCOUNT";

    type Event = AccountEvent;
    type Error = AccountError;

    fn apply(&mut self, event: Self::Event) -> Result<(), Self::Error> {
        if self.closed {
            return Err(AccountError::Closed);
        }
        match event {
            AccountEvent::Opened { owner } => self.owner = owner,
            AccountEvent::Deposited { amount } => {
                self.balance += amount;
                self.movements.push(amount);
            }
            AccountEvent::Withdrawn { amount } => {
                if amount > self.balance {
                    return Err(AccountError::InsufficientFunds {
                        balance: self.balance,
                        requested: amount,
                    });
                }
                self.balance -= amount;
                self.movements.push(-amount);
            }
            AccountEvent::Closed => self.closed = true,
        }
        Ok(())
    }

    fn as_snapshottable(&self) -> Option<&dyn Snapshottable> {
        Some(self)
    }

    fn as_snapshottable_mut(&mut self) -> Option<&mut dyn Snapshottable> {
        Some(self)
    }
}

impl Snapshottable for Account {
    fn snapshot_state(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn restore_state(&mut self, state: serde_json::Value) -> Result<(), serde_json::Error> {
        *self = serde_json::from_value(state)?;
        Ok(())
    }
}

/// Behaviour methods: each one records exactly one event.
pub fn open(root: &mut AggregateRoot<Account>, owner: &str) -> Result<(), AccountError> {
    root.record(AccountEvent::Opened {
        owner: owner.to_string(),
    })
}

pub fn deposit(root: &mut AggregateRoot<Account>, amount: i64) -> Result<(), AccountError> {
    root.record(AccountEvent::Deposited { amount })
}

pub fn withdraw(root: &mut AggregateRoot<Account>, amount: i64) -> Result<(), AccountError> {
    root.record(AccountEvent::Withdrawn { amount })
}

/// Factory stamping a currency on every blank account.
pub struct CurrencyFactory(pub &'static str);

impl AggregateFactory<Account> for CurrencyFactory {
    fn create(&self) -> Account {
        Account {
            currency: self.0.to_string(),
            ..Account::default()
        }
    }
}

/// Store holding every saver after `read_last` until all `parties` got there.
#[derive(Clone)]
pub struct GatedStore {
    pub inner: InMemoryPersist<Account>,
    pub appends: Arc<AtomicUsize>,
    gate: Arc<Barrier>,
}

impl GatedStore {
    pub fn new(inner: InMemoryPersist<Account>, parties: usize) -> Self {
        Self {
            inner,
            appends: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(Barrier::new(parties)),
        }
    }

    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventStore<Account> for GatedStore {
    async fn read_from(
        &self,
        aggregate_id: Uuid,
        from_version: usize,
    ) -> Result<EventStream<Account>, CqrsError> {
        self.inner.read_from(aggregate_id, from_version).await
    }

    async fn read_last(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<EventEnvelope<Account>>, CqrsError> {
        let last = self.inner.read_last(aggregate_id).await;
        self.gate.wait().await;
        last
    }

    async fn append(
        &self,
        aggregate_id: Uuid,
        events: Vec<EventEnvelope<Account>>,
    ) -> Result<(), CqrsError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.inner.append(aggregate_id, events).await
    }
}
