// ============================================================================
// Matching Engine Factory
// Wires a matching engine from configuration and collaborators
// ============================================================================

use crate::domain::MatchingEngineConfig;
use crate::engine::matching_engine::{Collaborators, MatchingEngine};
use crate::engine::PriceTimePriority;
use crate::interfaces::{
    BalanceProvider, Clock, CoordinationService, EventHandler, MatchingAlgorithm, NoOpEventHandler,
    OrderStore, SettlementSink, SignatureVerifier,
};
use std::sync::Arc;

// ============================================================================
// Factory Functions
// ============================================================================

/// Creates a single-instance, in-memory matching engine from configuration
///
/// # Arguments
/// * `config` - Engine configuration
/// * `event_handler` - Event handler for order, trade and market-data events
///
/// # Returns
/// * `Result<MatchingEngine, String>` - Configured matching engine or error
///
/// # Example
/// ```
/// use outcome_matching_engine::prelude::*;
/// use outcome_matching_engine::engine::factory::create_from_config;
/// use std::sync::Arc;
///
/// let engine = create_from_config(MatchingEngineConfig::default(), Arc::new(NoOpEventHandler)).unwrap();
/// assert_eq!(engine.algorithm_name(), "PriceTime");
/// ```
pub fn create_from_config(
    config: MatchingEngineConfig,
    event_handler: Arc<dyn EventHandler>,
) -> Result<MatchingEngine, String> {
    MatchingEngineBuilder::new(config)
        .with_event_handler(event_handler)
        .build()
}

// ============================================================================
// Builder Pattern for Advanced Configuration
// ============================================================================

/// Builder for creating matching engines with fluent API
///
/// Any collaborator left unset falls back to its in-memory implementation.
///
/// # Example
/// ```
/// use outcome_matching_engine::prelude::*;
/// use outcome_matching_engine::engine::factory::MatchingEngineBuilder;
/// use std::sync::Arc;
///
/// let balances = Arc::new(InMemoryBalances::new());
/// let engine = MatchingEngineBuilder::new(MatchingEngineConfig::default().with_fees(0, 25))
///     .with_event_handler(Arc::new(LoggingEventHandler))
///     .with_balances(balances)
///     .build()
///     .unwrap();
/// assert_eq!(engine.config().taker_fee_bps, 25);
/// ```
pub struct MatchingEngineBuilder {
    config: MatchingEngineConfig,
    algorithm: Option<Box<dyn MatchingAlgorithm>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    collaborators: Collaborators,
}

impl MatchingEngineBuilder {
    pub fn new(config: MatchingEngineConfig) -> Self {
        Self {
            config,
            algorithm: None,
            event_handler: None,
            collaborators: Collaborators::default(),
        }
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Use a custom crossing algorithm instead of price-time priority
    pub fn with_algorithm(mut self, algorithm: Box<dyn MatchingAlgorithm>) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_event_handler(mut self, event_handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(event_handler);
        self
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    pub fn with_store(mut self, store: Arc<dyn OrderStore>) -> Self {
        self.collaborators.store = store;
        self
    }

    pub fn with_coordination(mut self, coordination: Arc<dyn CoordinationService>) -> Self {
        self.collaborators.coordination = coordination;
        self
    }

    pub fn with_balances(mut self, balances: Arc<dyn BalanceProvider>) -> Self {
        self.collaborators.balances = balances;
        self
    }

    pub fn with_settlement(mut self, settlement: Arc<dyn SettlementSink>) -> Self {
        self.collaborators.settlement = settlement;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.collaborators.verifier = verifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.collaborators.clock = clock;
        self
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Build the matching engine
    pub fn build(self) -> Result<MatchingEngine, String> {
        self.config.validate()?;

        let algorithm = self
            .algorithm
            .unwrap_or_else(|| Box::new(PriceTimePriority::new()));
        let event_handler = self
            .event_handler
            .unwrap_or_else(|| Arc::new(NoOpEventHandler));

        tracing::debug!(algorithm = algorithm.name(), "Building matching engine");
        Ok(MatchingEngine::new(
            self.config,
            algorithm,
            event_handler,
            self.collaborators,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
