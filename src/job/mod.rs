//! Grid job controller.
//!
//! A [`Job`] trades one market. On start it reconciles the exchange's open
//! orders into its ledger, resolves the pair, then streams the account
//! channel: every complete fill of a tracked order is answered with a
//! counter-order one grid step away. Placement is retried once; successful
//! answers are persisted and notified.
//!
//! ```rust,ignore
//! let job = Arc::new(Job::new("btc-eth", config, services)?);
//! let (stop_tx, stop) = watch::channel(false);
//! let handle = tokio::spawn(job.clone().run(stop));
//! // ...
//! stop_tx.send_replace(true);
//! handle.await??;
//! ```

pub mod report;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::{ConfigError, JobConfig};
use crate::gateway::{ExchangeGateway, GatewayError, GatewayResult, OrderConfirmation};
use crate::grid::{compute_counter_order, cover_sell_fee, CounterOrder, GridConfig, GridError};
use crate::ledger::{Order, OrderLedger, OrderStatus};
use crate::notify::Notifier;
use crate::shared::{format_decimal, percent_of, OrderId, PairMetadata, Side};
use crate::store::{OrderStore, StoreError};
use crate::websocket::client::{is_stopped, stopped, EventFeed, StopSignal};
use crate::websocket::error::WebSocketError;
use crate::websocket::state::{ApplyOutcome, MarketBook};
use crate::websocket::types::{AccountUpdate, MarketUpdate, OrderTransition, TransitionKind};

pub use report::Summary;

/// Wait before the single placement retry
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Wait before resubscribing after a lost subscription
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

const UPDATE_BUFFER: usize = 128;

/// Job errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("pair {0} is not listed by the exchange")]
    UnknownPair(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("no counter-order for {order}: {source}")]
    Grid {
        order: OrderId,
        #[source]
        source: GridError,
    },

    #[error("placing counter-order for {order} failed: {source}")]
    Placement {
        order: OrderId,
        #[source]
        source: GatewayError,
    },

    #[error("order store error: {0}")]
    Store(#[from] StoreError),

    #[error("feed error: {0}")]
    Feed(#[from] WebSocketError),
}

/// Result type alias for job operations
pub type JobResult<T> = Result<T, JobError>;

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Starting,
    Reconciling,
    Streaming,
    /// Waiting to retry a placement or a subscription
    Retrying,
    Stopped,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Reconciling => "reconciling",
            Self::Streaming => "streaming",
            Self::Retrying => "retrying",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What a job did with one order transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The order is not in this job's ledger
    NotRelated,
    /// A counter-order was placed
    Placed {
        counter: CounterOrder,
        confirmation: OrderConfirmation,
    },
    /// The fill was answered before
    AlreadyFilled,
    Canceled,
    /// Partial fills and other updates, logged only
    Updated,
}

/// Ledger-side result of a transition, before any placement.
enum Transition {
    Answer(Order),
    Done(TransitionOutcome),
}

/// External collaborators of a job.
#[derive(Clone)]
pub struct JobServices {
    pub gateway: Arc<dyn ExchangeGateway>,
    pub feed: Arc<dyn EventFeed>,
    pub store: Arc<dyn OrderStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Grid trading job for one market.
pub struct Job {
    id: String,
    config: JobConfig,
    secondary: String,
    services: JobServices,
    ledger: OrderLedger,
    state: watch::Sender<JobState>,
    last_operation: Mutex<DateTime<Utc>>,
    book: Mutex<Option<MarketBook>>,
    retry_delay: Duration,
    resubscribe_delay: Duration,
    span: tracing::Span,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("symbol", &self.config.symbol)
            .field("state", &self.state())
            .field("orders", &self.ledger.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Job {
    /// Create a job from a validated configuration.
    ///
    /// Seeds the balances of both assets of the pair to zero.
    pub fn new(id: impl Into<String>, config: JobConfig, services: JobServices) -> JobResult<Self> {
        config.validate()?;
        let id = id.into();
        let secondary = config.secondary();

        let ledger = OrderLedger::new();
        ledger.set_balance(&config.primary, Decimal::ZERO);
        ledger.set_balance(&secondary, Decimal::ZERO);

        let span = tracing::info_span!(
            "job",
            id = %id,
            exchange = %config.provider,
            market = %config.symbol
        );
        let (state, _) = watch::channel(JobState::Starting);

        Ok(Self {
            id,
            config,
            secondary,
            services,
            ledger,
            state,
            last_operation: Mutex::new(Utc::now()),
            book: Mutex::new(None),
            retry_delay: RETRY_DELAY,
            resubscribe_delay: RESUBSCRIBE_DELAY,
            span,
        })
    }

    /// Override the wait before the placement retry.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Override the wait before resubscribing.
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn ledger(&self) -> &OrderLedger {
        &self.ledger
    }

    /// Base asset of the pair
    pub fn secondary(&self) -> &str {
        &self.secondary
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: JobState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "Job state changed");
        }
    }

    /// Time of the last placed order or alert.
    pub fn last_operation(&self) -> DateTime<Utc> {
        *lock(&self.last_operation)
    }

    fn touch(&self, now: DateTime<Utc>) {
        *lock(&self.last_operation) = now;
    }

    /// Copy of the local order book, when the market channel is watched.
    pub fn market_book(&self) -> Option<MarketBook> {
        lock(&self.book).clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Run until `stop` fires or a fatal error occurs.
    ///
    /// Fatal errors (unknown pair, refused credentials) are notified before
    /// they are returned.
    pub async fn run(self: Arc<Self>, stop: StopSignal) -> JobResult<()> {
        let span = self.span.clone();
        let result = Arc::clone(&self).run_inner(stop).instrument(span.clone()).await;

        self.set_state(JobState::Stopped);
        match &result {
            Ok(()) => span.in_scope(|| tracing::info!("Job stopped")),
            Err(e) => {
                span.in_scope(|| tracing::error!(error = %e, "Job failed"));
                let text = report::stopped(&self.config.provider, &self.config.symbol, &e.to_string());
                self.notify(&text).await;
            }
        }
        result
    }

    async fn run_inner(self: Arc<Self>, stop: StopSignal) -> JobResult<()> {
        tracing::info!("Starting job");
        self.set_state(JobState::Reconciling);
        self.reconcile().await;

        let pair = self
            .services
            .gateway
            .get_pair(&self.config.symbol)
            .await?
            .ok_or_else(|| JobError::UnknownPair(self.config.symbol.clone()))?;
        let grid = self.config.grid(pair.lot_size);
        tracing::info!(
            channel = %pair.id,
            lot_size = %format_decimal(&grid.lot_size),
            "Pair resolved"
        );

        self.set_state(JobState::Streaming);

        // The market loop follows the account loop, not the caller's stop.
        let (halt_tx, halt) = watch::channel(false);
        let market = self.config.watch_market.then(|| {
            tokio::spawn(
                Arc::clone(&self)
                    .watch_market(pair.clone(), halt)
                    .instrument(tracing::Span::current()),
            )
        });

        let result = Arc::clone(&self).stream_account(pair, grid, stop).await;

        halt_tx.send_replace(true);
        if let Some(task) = market {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Market task failed");
            }
        }
        result
    }

    /// Attach the exchange's open orders. Failure is logged and tolerated.
    async fn reconcile(&self) {
        match self.services.gateway.get_open_orders(&self.config.symbol).await {
            Ok(orders) => {
                let attached = orders
                    .iter()
                    .filter(|open| self.ledger.attach(Order::from_open(open, self.config.fee)))
                    .count();
                tracing::info!(open = orders.len(), attached, "Reconciled open orders");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Open order fetch failed, streaming without reconciliation");
            }
        }
    }

    async fn stream_account(
        self: Arc<Self>,
        pair: PairMetadata,
        grid: GridConfig,
        mut stop: StopSignal,
    ) -> JobResult<()> {
        let (tx, mut rx) = mpsc::channel::<AccountUpdate>(UPDATE_BUFFER);
        let job = Arc::clone(&self);
        let consumer = tokio::spawn(
            async move {
                // Ledger changes apply in feed order; fills are answered concurrently.
                let mut answers = JoinSet::new();
                while let Some(update) = rx.recv().await {
                    for filled in job.apply_account_update(&pair, &update) {
                        let job = Arc::clone(&job);
                        let grid = grid.clone();
                        answers.spawn(
                            async move {
                                if let Err(e) = job.answer_fill(&filled, &grid).await {
                                    tracing::error!(order_id = filled.id, error = %e, "Transition not handled");
                                }
                            }
                            .instrument(tracing::Span::current()),
                        );
                    }
                    while answers.try_join_next().is_some() {}
                }
                while answers.join_next().await.is_some() {}
            }
            .instrument(tracing::Span::current()),
        );

        let result = loop {
            if is_stopped(&stop) {
                break Ok(());
            }

            tracing::info!("Subscribing to account updates");
            match self
                .services
                .feed
                .subscribe_account_updates(tx.clone(), stop.clone())
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_fatal() => break Err(JobError::Feed(e)),
                Err(e) => tracing::warn!(error = %e, "Account subscription lost"),
            }

            if is_stopped(&stop) {
                break Ok(());
            }
            self.set_state(JobState::Retrying);
            tokio::select! {
                _ = tokio::time::sleep(self.resubscribe_delay) => self.set_state(JobState::Streaming),
                _ = stopped(&mut stop) => break Ok(()),
            }
        };

        // The consumer drains what was delivered, then ends with the last sender.
        drop(tx);
        if let Err(e) = consumer.await {
            tracing::warn!(error = %e, "Account consumer failed");
        }
        result
    }

    async fn watch_market(self: Arc<Self>, pair: PairMetadata, mut stop: StopSignal) {
        *lock(&self.book) = Some(MarketBook::new(pair.id));

        let (tx, mut rx) = mpsc::channel::<MarketUpdate>(UPDATE_BUFFER);
        let job = Arc::clone(&self);
        let consumer = tokio::spawn(
            async move {
                while let Some(update) = rx.recv().await {
                    job.apply_market_update(&update);
                }
            }
            .instrument(tracing::Span::current()),
        );

        loop {
            if is_stopped(&stop) {
                break;
            }

            tracing::info!(channel = %pair.id, "Subscribing to market updates");
            if let Err(e) = self
                .services
                .feed
                .subscribe_market_updates(pair.id, tx.clone(), stop.clone())
                .await
            {
                tracing::warn!(channel = %pair.id, error = %e, "Market subscription lost");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
                _ = stopped(&mut stop) => break,
            }
        }

        drop(tx);
        let _ = consumer.await;
    }

    /// Apply a market channel update to the local order book.
    pub fn apply_market_update(&self, update: &MarketUpdate) {
        let mut book = lock(&self.book);
        let Some(book) = book.as_mut() else {
            return;
        };
        if let ApplyOutcome::Stale { last, received } = book.apply(update) {
            tracing::debug!(channel = %book.channel, last, received, "Stale market update ignored");
        }
    }

    // ========================================================================
    // Account events
    // ========================================================================

    /// Process one account channel message for `pair`, answering its fills
    /// in order.
    pub async fn handle_account_update(
        &self,
        pair: &PairMetadata,
        grid: &GridConfig,
        update: AccountUpdate,
    ) {
        for filled in self.apply_account_update(pair, &update) {
            if let Err(e) = self.answer_fill(&filled, grid).await {
                tracing::error!(order_id = filled.id, error = %e, "Transition not handled");
            }
        }
    }

    /// Apply the ledger side of one account message.
    ///
    /// Returns the orders whose complete fill still needs a counter-order,
    /// already marked filled.
    fn apply_account_update(&self, pair: &PairMetadata, update: &AccountUpdate) -> Vec<Order> {
        for open in &update.new_orders {
            if open.market.matches(pair) {
                self.ledger.attach(Order::from_open(open, self.config.fee));
            } else {
                tracing::debug!(
                    order_id = open.order_number,
                    market = %open.market,
                    "Ignoring order on another market"
                );
            }
        }

        for open in &update.pending_orders {
            tracing::info!(
                order_id = open.order_number,
                market = %open.market,
                side = %open.side,
                rate = %format_decimal(&open.rate),
                amount = %format_decimal(&open.amount),
                "Pending order"
            );
        }

        update
            .order_transitions
            .iter()
            .filter_map(|transition| match self.apply_transition(transition) {
                Transition::Answer(filled) => Some(filled),
                Transition::Done(_) => None,
            })
            .collect()
    }

    /// React to one order transition.
    ///
    /// A complete fill of a tracked order is answered once; a cancel detaches
    /// the order whatever amount remains.
    pub async fn handle_transition(
        &self,
        grid: &GridConfig,
        transition: &OrderTransition,
    ) -> JobResult<TransitionOutcome> {
        match self.apply_transition(transition) {
            Transition::Answer(filled) => self.answer_fill(&filled, grid).await,
            Transition::Done(outcome) => Ok(outcome),
        }
    }

    fn apply_transition(&self, transition: &OrderTransition) -> Transition {
        let id = transition.order_number;
        let Ok(order) = self.ledger.get(id) else {
            tracing::info!(order_id = id, "Order not related");
            return Transition::Done(TransitionOutcome::NotRelated);
        };

        if transition.is_complete_fill() {
            if !matches!(self.ledger.mark_filled(id), Ok(true)) {
                tracing::debug!(order_id = id, "Fill already answered");
                return Transition::Done(TransitionOutcome::AlreadyFilled);
            }
            return Transition::Answer(order);
        }

        if transition.kind == TransitionKind::Canceled {
            self.ledger.detach(id);
            return Transition::Done(TransitionOutcome::Canceled);
        }

        tracing::info!(
            order_id = id,
            kind = ?transition.kind,
            remaining = %format_decimal(&transition.remaining_amount),
            "Order update"
        );
        Transition::Done(TransitionOutcome::Updated)
    }

    async fn answer_fill(&self, filled: &Order, grid: &GridConfig) -> JobResult<TransitionOutcome> {
        let counter = compute_counter_order(filled, grid).map_err(|source| JobError::Grid {
            order: filled.id,
            source,
        })?;
        let cover = cover_sell_fee(&counter, filled, self.ledger.balance(&self.secondary), grid)
            .map_err(|source| JobError::Grid {
                order: filled.id,
                source,
            })?;
        let counter = cover.order;

        let confirmation = self
            .place_with_retry(&counter)
            .await
            .map_err(|source| JobError::Placement {
                order: filled.id,
                source,
            })?;
        tracing::info!(
            order_id = confirmation.order_number,
            filled_id = filled.id,
            side = %counter.side,
            price = %format_decimal(&counter.price),
            quantity = %format_decimal(&counter.quantity),
            "Order created"
        );
        self.ledger.link_counter(filled.id, confirmation.order_number);

        if !cover.balance_delta.is_zero() {
            let balance = self.ledger.add_balance(&self.secondary, cover.balance_delta);
            tracing::debug!(
                asset = %self.secondary,
                delta = %format_decimal(&cover.balance_delta),
                balance = %format_decimal(&balance),
                "Fee cover applied"
            );
        }

        let record = Order {
            fee: percent_of(filled.volume, grid.fee_percent),
            status: OrderStatus::Filled,
            placed_at: Utc::now(),
            ..filled.clone()
        };
        if let Err(e) = self.services.store.append(&self.id, &record).await {
            tracing::warn!(order_id = record.id, error = %e, "Order record not saved");
        }

        self.notify_order(filled, &counter).await;
        Ok(TransitionOutcome::Placed {
            counter,
            confirmation,
        })
    }

    /// Place `counter`, retrying exactly once after [`Job::with_retry_delay`].
    async fn place_with_retry(&self, counter: &CounterOrder) -> GatewayResult<OrderConfirmation> {
        match self.place(counter).await {
            Ok(confirmation) => return Ok(confirmation),
            Err(e) => tracing::warn!(error = %e, "Placement failed, retrying"),
        }

        self.set_state(JobState::Retrying);
        tokio::time::sleep(self.retry_delay).await;
        let result = self.place(counter).await;
        self.set_state(JobState::Streaming);

        if let Err(e) = &result {
            tracing::error!(
                side = %counter.side,
                price = %format_decimal(&counter.price),
                quantity = %format_decimal(&counter.quantity),
                error = %e,
                "Placement abandoned"
            );
        }
        result
    }

    async fn place(&self, counter: &CounterOrder) -> GatewayResult<OrderConfirmation> {
        self.services
            .gateway
            .place_order(&self.config.symbol, counter.side, counter.price, counter.quantity)
            .await
    }

    // ========================================================================
    // Alerts
    // ========================================================================

    /// Report a placed counter-order, when alerts for its side are on.
    pub async fn notify_order(&self, filled: &Order, counter: &CounterOrder) {
        let alerts = &self.config.alerts;
        let enabled = match counter.side {
            Side::Buy => alerts.buy,
            Side::Sell => alerts.sell,
        };
        if enabled {
            let text = report::order_placed(&self.config.provider, &self.config.symbol, filled, counter);
            self.notify(&text).await;
        }
        self.touch(Utc::now());
    }

    /// Minute tick: idle alert and scheduled summaries.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let idle = self.config.alerts.idle;
        if idle > 0 {
            let minutes = (now - self.last_operation()).num_minutes();
            if minutes > i64::from(idle) {
                let text = report::idling(&self.config.provider, &self.config.symbol, minutes);
                self.notify(&text).await;
                self.touch(now);
            }
        }

        if now.minute() == 0 && self.config.alerts.summary.contains(&now.hour()) {
            match self.summary(now).await {
                Ok(summary) => {
                    let text = summary.to_markdown(&self.config.provider, &self.config.symbol);
                    self.notify(&text).await;
                }
                Err(e) => {
                    self.span
                        .in_scope(|| tracing::warn!(error = %e, "Summary not available"));
                }
            }
        }
    }

    /// Results of the last 24 hours, from the records of today and yesterday.
    pub async fn summary(&self, now: DateTime<Utc>) -> JobResult<Summary> {
        let store = &self.services.store;
        let mut records = store.load_day(&self.id, now.date_naive()).await?;
        let yesterday = (now - chrono::Duration::days(1)).date_naive();
        records.extend(store.load_day(&self.id, yesterday).await?);

        Ok(Summary::from_records(&records, now, &self.config.grid(None)))
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.services.notifier.notify(text).await {
            self.span
                .in_scope(|| tracing::warn!(error = %e, "Notification failed"));
        }
    }
}
