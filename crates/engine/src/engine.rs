//! The saga engine: starts, drives, signals and recovers order sagas.
//!
//! Each saga runs on its own task. The driver journals every decision
//! before acting on the next phase, so a restarted process can fold the
//! stream and pick up where the previous driver stopped.

use std::collections::HashMap;
use std::sync::Arc;

use common::{CustomerId, Money, OrderId, PaymentId, Priority};
use event_store::{AppendOptions, EventEnvelope, EventStore, EventStoreExt, StreamId};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::OrderSagaEvent;
use crate::fulfillment::{
    self, STEP_CHARGE, STEP_MARK_SHIPPED, STEP_RECEIVE, STEP_VALIDATE, STREAM_TYPE,
};
use crate::instance::{SagaInstance, SagaStatus};
use crate::ledger::IdempotencyLedger;
use crate::phase::OrderPhase;
use crate::search::{OrderFilter, OrderSummary, SearchAttributes, SearchIndex};
use crate::shipping::ShippingSaga;
use crate::signal::{SignalKind, SignalMailbox};
use crate::steps::{FulfillmentOps, StepExecutor};

/// Request to start a new order saga.
#[derive(Debug, Clone)]
pub struct StartOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub customer_name: String,
    /// Payment token. Generated when not supplied.
    pub payment_id: Option<PaymentId>,
    pub order_total: Money,
    pub priority: Priority,
}

impl StartOrder {
    /// Creates a start request with the default total and priority.
    pub fn new(
        order_id: impl Into<OrderId>,
        customer_id: impl Into<CustomerId>,
        customer_name: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            customer_name: customer_name.into(),
            payment_id: None,
            order_total: Money::from_dollars(100),
            priority: Priority::Normal,
        }
    }

    pub fn payment_id(mut self, payment_id: impl Into<PaymentId>) -> Self {
        self.payment_id = Some(payment_id.into());
        self
    }

    pub fn order_total(mut self, total: Money) -> Self {
        self.order_total = total;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Final result of a saga run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SagaOutcome {
    /// The order shipped and was marked shipped.
    Dispatched,
    /// Cancelled by an operator before payment.
    Cancelled,
    /// Every shipping attempt failed.
    ShippingFailed(String),
    /// A step failed, was rejected, or approval timed out.
    Failed(String),
}

impl SagaOutcome {
    fn from_instance(instance: &SagaInstance) -> Option<Self> {
        let error = || {
            instance
                .last_error
                .clone()
                .unwrap_or_else(|| "saga failed".to_string())
        };
        match instance.phase {
            OrderPhase::Completed => Some(SagaOutcome::Dispatched),
            OrderPhase::Cancelled => Some(SagaOutcome::Cancelled),
            OrderPhase::ShippingFailed => Some(SagaOutcome::ShippingFailed(error())),
            OrderPhase::Failed => Some(SagaOutcome::Failed(error())),
            _ => None,
        }
    }
}

struct InstanceHandle {
    mailbox: Arc<SignalMailbox>,
    outcome: watch::Receiver<Option<SagaOutcome>>,
}

struct Inner<S> {
    store: Arc<S>,
    ops: Arc<dyn FulfillmentOps>,
    ledger: Arc<dyn IdempotencyLedger>,
    config: EngineConfig,
    index: SearchIndex,
    instances: RwLock<HashMap<OrderId, InstanceHandle>>,
}

/// Orchestrates order sagas over an event store.
pub struct SagaEngine<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SagaEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: EventStore + 'static> SagaEngine<S> {
    pub fn new(
        store: Arc<S>,
        ops: Arc<dyn FulfillmentOps>,
        ledger: Arc<dyn IdempotencyLedger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                ops,
                ledger,
                config,
                index: SearchIndex::new(),
                instances: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Starts a new saga and spawns its driver.
    ///
    /// Returns the payment token the saga will charge. Fails with
    /// `AlreadyExists` when a saga for the order id was ever started.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn start(&self, request: StartOrder) -> Result<PaymentId> {
        if request.order_id.as_str().is_empty() {
            return Err(EngineError::InvalidOrder("order id is empty".to_string()));
        }
        if request.order_total.is_negative() {
            return Err(EngineError::InvalidOrder(
                "order total is negative".to_string(),
            ));
        }

        let order_id = request.order_id.clone();
        if self.inner.instances.read().await.contains_key(&order_id) {
            return Err(EngineError::AlreadyExists(order_id));
        }
        if self
            .inner
            .store
            .stream_exists(&StreamId::new(order_id.as_str()))
            .await?
        {
            return Err(EngineError::AlreadyExists(order_id));
        }

        let payment_id = request
            .payment_id
            .clone()
            .unwrap_or_else(fulfillment::generate_payment_id);

        let mut instance = SagaInstance::default();
        let started = OrderSagaEvent::saga_started(
            order_id.clone(),
            payment_id.clone(),
            request.customer_id.clone(),
            request.customer_name.clone(),
            request.order_total,
            request.priority,
        );
        // A concurrent starter loses the expected-version race here.
        match self.inner.append(&mut instance, started).await {
            Ok(()) => {}
            Err(EngineError::EventStore(event_store::EventStoreError::VersionConflict {
                ..
            })) => {
                return Err(EngineError::AlreadyExists(order_id));
            }
            Err(error) => return Err(error),
        }

        self.inner.index.publish(
            order_id.clone(),
            SearchAttributes {
                customer_id: request.customer_id,
                customer_name: request.customer_name,
                order_total: request.order_total,
                priority: request.priority,
            },
        );

        metrics::counter!("saga_started_total").increment(1);
        info!(order_id = %order_id, payment_id = %payment_id, "saga started");

        self.spawn_driver(order_id).await;
        Ok(payment_id)
    }

    /// Resumes a journaled saga in this process.
    ///
    /// Terminal sagas get a finished handle so `await_result` works;
    /// anything else gets a fresh driver that folds the stream and
    /// continues from the recorded phase.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, order_id: &OrderId) -> Result<()> {
        if self.inner.instances.read().await.contains_key(order_id) {
            return Ok(());
        }

        let instance = self
            .inner
            .load(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(order_id.clone()))?;

        self.inner.index.publish(
            order_id.clone(),
            SearchAttributes {
                customer_id: instance.customer_id.clone(),
                customer_name: instance.customer_name.clone(),
                order_total: instance.order_total,
                priority: instance.priority,
            },
        );

        if let Some(outcome) = SagaOutcome::from_instance(&instance) {
            let (_, rx) = watch::channel(Some(outcome));
            let handle = InstanceHandle {
                mailbox: Arc::new(SignalMailbox::new()),
                outcome: rx,
            };
            self.inner
                .instances
                .write()
                .await
                .insert(order_id.clone(), handle);
            return Ok(());
        }

        info!(order_id = %order_id, phase = %instance.phase, "resuming saga");
        self.spawn_driver(order_id.clone()).await;
        Ok(())
    }

    /// Resumes every journaled saga not already running here.
    ///
    /// Returns the ids that were picked up.
    pub async fn recover_all(&self) -> Result<Vec<OrderId>> {
        let streams = self.inner.store.list_streams(STREAM_TYPE).await?;
        let mut resumed = Vec::new();
        for stream in streams {
            let order_id = OrderId::new(stream.as_str());
            if self.inner.instances.read().await.contains_key(&order_id) {
                continue;
            }
            self.resume(&order_id).await?;
            resumed.push(order_id);
        }
        Ok(resumed)
    }

    /// Posts a signal to a running saga.
    ///
    /// The signal takes effect at the driver's next checkpoint. Signals
    /// posted after the saga finished are ignored.
    #[tracing::instrument(skip(self, kind), fields(signal = %kind))]
    pub async fn signal(&self, order_id: &OrderId, kind: SignalKind) -> Result<()> {
        let instances = self.inner.instances.read().await;
        match instances.get(order_id) {
            Some(handle) => {
                if handle.outcome.borrow().is_some() {
                    warn!(order_id = %order_id, signal = %kind, "signal ignored, saga finished");
                    return Ok(());
                }
                handle.mailbox.post(order_id.clone(), kind);
                Ok(())
            }
            None => {
                drop(instances);
                if self
                    .inner
                    .store
                    .stream_exists(&StreamId::new(order_id.as_str()))
                    .await?
                {
                    Err(EngineError::NotRunning(order_id.clone()))
                } else {
                    Err(EngineError::NotFound(order_id.clone()))
                }
            }
        }
    }

    /// Returns the current status of a saga, folded from the journal.
    ///
    /// Works for finished sagas and for sagas driven by another
    /// process; never touches the driver.
    pub async fn status(&self, order_id: &OrderId) -> Result<SagaStatus> {
        let instance = self
            .inner
            .load(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(order_id.clone()))?;
        Ok(instance.status())
    }

    /// Waits for the saga to reach a terminal phase and returns its
    /// outcome.
    pub async fn await_result(&self, order_id: &OrderId) -> Result<SagaOutcome> {
        let receiver = {
            let instances = self.inner.instances.read().await;
            instances.get(order_id).map(|h| h.outcome.clone())
        };

        if let Some(mut receiver) = receiver {
            if let Ok(value) = receiver.wait_for(|outcome| outcome.is_some()).await {
                if let Some(outcome) = value.clone() {
                    return Ok(outcome);
                }
            }
            // Driver died without reporting; fall through to the journal.
        }

        let instance = self
            .inner
            .load(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(order_id.clone()))?;
        SagaOutcome::from_instance(&instance).ok_or_else(|| EngineError::NotRunning(order_id.clone()))
    }

    /// Queries sagas by their published start attributes.
    pub async fn query(&self, filter: &OrderFilter) -> Vec<OrderSummary> {
        self.inner.index.query(filter)
    }

    async fn spawn_driver(&self, order_id: OrderId) {
        let mailbox = Arc::new(SignalMailbox::new());
        let (tx, rx) = watch::channel(None);
        let handle = InstanceHandle {
            mailbox: mailbox.clone(),
            outcome: rx,
        };
        self.inner
            .instances
            .write()
            .await
            .insert(order_id.clone(), handle);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.drive(order_id, mailbox, tx).await;
        });
    }
}

impl<S: EventStore + 'static> Inner<S> {
    async fn load(&self, order_id: &OrderId) -> Result<Option<SagaInstance>> {
        let envelopes = self
            .store
            .events_for_stream(&StreamId::new(order_id.as_str()))
            .await?;
        Ok(SagaInstance::fold(&envelopes)?)
    }

    async fn append(&self, instance: &mut SagaInstance, event: OrderSagaEvent) -> Result<()> {
        let version = instance.version.next();
        let stream_id = if instance.order_id.as_str().is_empty() {
            // First event; the instance learns its id from the apply.
            if let OrderSagaEvent::SagaStarted(data) = &event {
                StreamId::new(data.order_id.as_str())
            } else {
                return Err(EngineError::InvalidOrder(
                    "first event must start the saga".to_string(),
                ));
            }
        } else {
            StreamId::new(instance.order_id.as_str())
        };

        let envelope = EventEnvelope::for_event(stream_id, STREAM_TYPE, &event, version)?;
        self.store
            .append_event(envelope, AppendOptions::expect_version(instance.version))
            .await?;
        instance.apply(&event);
        instance.version = version;
        Ok(())
    }

    async fn drive(
        self: Arc<Self>,
        order_id: OrderId,
        mailbox: Arc<SignalMailbox>,
        tx: watch::Sender<Option<SagaOutcome>>,
    ) {
        let started_at = std::time::Instant::now();
        let outcome = match self.run_phases(&order_id, &mailbox).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(order_id = %order_id, %error, "saga driver failed");
                SagaOutcome::Failed(error.to_string())
            }
        };

        match &outcome {
            SagaOutcome::Dispatched => metrics::counter!("saga_completed_total").increment(1),
            SagaOutcome::Cancelled => metrics::counter!("saga_cancelled_total").increment(1),
            SagaOutcome::ShippingFailed(_) | SagaOutcome::Failed(_) => {
                metrics::counter!("saga_failed_total").increment(1)
            }
        }
        metrics::histogram!("saga_duration_seconds").record(started_at.elapsed().as_secs_f64());
        info!(order_id = %order_id, ?outcome, "saga finished");

        let _ = tx.send(Some(outcome));
    }

    async fn run_phases(
        &self,
        order_id: &OrderId,
        mailbox: &SignalMailbox,
    ) -> Result<SagaOutcome> {
        let mut instance = self
            .load(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(order_id.clone()))?;

        if let Some(outcome) = SagaOutcome::from_instance(&instance) {
            return Ok(outcome);
        }

        let executor = StepExecutor::new(
            self.config.step_timeout,
            self.config.step_attempts,
            self.config.step_backoff,
        );

        loop {
            // Checkpoint: queued signals take effect between phases.
            if let Some(outcome) = self.apply_signals(&mut instance, mailbox).await? {
                return Ok(outcome);
            }

            match instance.phase {
                OrderPhase::Init => {
                    self.append(
                        &mut instance,
                        OrderSagaEvent::phase_entered(OrderPhase::Receiving),
                    )
                    .await?;
                }
                OrderPhase::Receiving => {
                    let ops = self.ops.clone();
                    let items = match executor
                        .run(STEP_RECEIVE, || ops.receive_order(order_id))
                        .await
                    {
                        Ok(items) => items,
                        Err(error) => return self.fail(&mut instance, error.to_string()).await,
                    };
                    self.append(&mut instance, OrderSagaEvent::order_received(items))
                        .await?;
                    self.append(
                        &mut instance,
                        OrderSagaEvent::phase_entered(OrderPhase::Validating),
                    )
                    .await?;
                }
                OrderPhase::Validating => {
                    let ops = self.ops.clone();
                    let payload = instance.payload();
                    if let Err(error) = executor
                        .run(STEP_VALIDATE, || ops.validate_order(&payload))
                        .await
                    {
                        return self.fail(&mut instance, error.to_string()).await;
                    }
                    self.append(&mut instance, OrderSagaEvent::OrderValidated)
                        .await?;
                    self.append(
                        &mut instance,
                        OrderSagaEvent::phase_entered(OrderPhase::AwaitingApproval),
                    )
                    .await?;
                }
                OrderPhase::AwaitingApproval => {
                    let deadline = Instant::now() + self.config.approval_timeout;
                    loop {
                        if let Some(outcome) = self.apply_signals(&mut instance, mailbox).await? {
                            return Ok(outcome);
                        }
                        if instance.approved {
                            break;
                        }
                        if !mailbox.wait_until(deadline).await {
                            self.append(&mut instance, OrderSagaEvent::approval_timed_out())
                                .await?;
                            return self
                                .fail(&mut instance, "approval timed out".to_string())
                                .await;
                        }
                    }
                    self.append(
                        &mut instance,
                        OrderSagaEvent::phase_entered(OrderPhase::ChargingPayment),
                    )
                    .await?;
                }
                OrderPhase::ChargingPayment => {
                    let ops = self.ops.clone();
                    let ledger = self.ledger.clone();
                    let payload = instance.payload();
                    let payment_id = instance.payment_id.clone();
                    let amount = instance.order_total;

                    let record = match executor
                        .run(STEP_CHARGE, || {
                            let effect =
                                Box::pin(ops.charge_payment(&payload, &payment_id, amount));
                            ledger.charge(&payment_id, amount, effect)
                        })
                        .await
                    {
                        Ok(record) => record,
                        Err(error) => return self.fail(&mut instance, error.to_string()).await,
                    };

                    metrics::counter!("payment_charges_total").increment(1);
                    self.append(
                        &mut instance,
                        OrderSagaEvent::payment_charged(
                            record.payment_id,
                            record.status,
                            record.amount,
                        ),
                    )
                    .await?;
                    self.append(
                        &mut instance,
                        OrderSagaEvent::phase_entered(OrderPhase::Shipping),
                    )
                    .await?;
                }
                OrderPhase::Shipping => {
                    // A dispatch journaled before a crash must not be
                    // repeated or counted as exhaustion on resume.
                    if instance.carrier_dispatched {
                        self.append(
                            &mut instance,
                            OrderSagaEvent::phase_entered(OrderPhase::MarkingShipped),
                        )
                        .await?;
                        continue;
                    }

                    let shipping = ShippingSaga::new(executor.clone(), self.ops.clone());
                    let payload = instance.payload();
                    let budget = self.config.shipping_attempts.max(1);
                    let mut attempt = instance.shipping_attempts + 1;
                    let mut dispatched = false;

                    while attempt <= budget {
                        self.append(
                            &mut instance,
                            OrderSagaEvent::shipping_attempt_started(attempt),
                        )
                        .await?;

                        let result = shipping.run(&payload, attempt).await;
                        if result.succeeded() {
                            self.append(&mut instance, OrderSagaEvent::carrier_dispatched(attempt))
                                .await?;
                            dispatched = true;
                            break;
                        }

                        let reason = result
                            .error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "shipping attempt failed".to_string());
                        warn!(order_id = %order_id, attempt, %reason, "shipping attempt failed");
                        self.append(
                            &mut instance,
                            OrderSagaEvent::shipping_attempt_failed(attempt, reason),
                        )
                        .await?;

                        if attempt < budget {
                            tokio::time::sleep(self.config.shipping_backoff).await;
                        }
                        attempt += 1;
                    }

                    if !dispatched {
                        self.append(&mut instance, OrderSagaEvent::shipping_exhausted(budget))
                            .await?;
                        let reason = instance
                            .last_error
                            .clone()
                            .unwrap_or_else(|| format!("shipping failed after {budget} attempts"));
                        return Ok(SagaOutcome::ShippingFailed(reason));
                    }

                    self.append(
                        &mut instance,
                        OrderSagaEvent::phase_entered(OrderPhase::MarkingShipped),
                    )
                    .await?;
                }
                OrderPhase::MarkingShipped => {
                    let ops = self.ops.clone();
                    if let Err(error) = executor
                        .run(STEP_MARK_SHIPPED, || ops.mark_shipped(order_id))
                        .await
                    {
                        return self.fail(&mut instance, error.to_string()).await;
                    }
                    self.append(&mut instance, OrderSagaEvent::OrderShipped)
                        .await?;
                    self.append(&mut instance, OrderSagaEvent::saga_completed())
                        .await?;
                    return Ok(SagaOutcome::Dispatched);
                }
                OrderPhase::Completed
                | OrderPhase::Cancelled
                | OrderPhase::ShippingFailed
                | OrderPhase::Failed => {
                    return SagaOutcome::from_instance(&instance)
                        .ok_or_else(|| EngineError::NotRunning(order_id.clone()));
                }
            }
        }
    }

    /// Drains the mailbox and journals each signal's effect.
    ///
    /// Returns the terminal outcome when a cancel was honored.
    async fn apply_signals(
        &self,
        instance: &mut SagaInstance,
        mailbox: &SignalMailbox,
    ) -> Result<Option<SagaOutcome>> {
        for signal in mailbox.drain() {
            match signal.kind {
                SignalKind::Cancel => {
                    if instance.phase.is_cancellable() {
                        self.append(instance, OrderSagaEvent::cancel_requested())
                            .await?;
                        self.append(instance, OrderSagaEvent::saga_cancelled())
                            .await?;
                        info!(order_id = %instance.order_id, "saga cancelled");
                        return Ok(Some(SagaOutcome::Cancelled));
                    }
                    self.reject_signal(instance, SignalKind::Cancel).await?;
                }
                SignalKind::UpdateAddress { address } => {
                    if instance.phase.accepts_address_update() {
                        self.append(instance, OrderSagaEvent::address_updated(address))
                            .await?;
                    } else {
                        self.reject_signal(instance, SignalKind::UpdateAddress { address })
                            .await?;
                    }
                }
                SignalKind::Approve => {
                    // Re-approving an approved order is a no-op in any
                    // phase.
                    if instance.approved {
                        continue;
                    }
                    if instance.phase.is_cancellable() {
                        self.append(instance, OrderSagaEvent::approval_granted())
                            .await?;
                    } else {
                        self.reject_signal(instance, SignalKind::Approve).await?;
                    }
                }
            }
        }
        Ok(None)
    }

    async fn reject_signal(&self, instance: &mut SagaInstance, kind: SignalKind) -> Result<()> {
        warn!(
            order_id = %instance.order_id,
            signal = %kind,
            phase = %instance.phase,
            "signal rejected"
        );
        metrics::counter!("signals_rejected_total").increment(1);
        let phase = instance.phase;
        self.append(instance, OrderSagaEvent::signal_rejected(kind, phase))
            .await
    }

    async fn fail(&self, instance: &mut SagaInstance, reason: String) -> Result<SagaOutcome> {
        self.append(instance, OrderSagaEvent::saga_failed(reason.clone()))
            .await?;
        Ok(SagaOutcome::Failed(reason))
    }
}
