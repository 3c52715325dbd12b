//! The control cycle
//!
//! A cycle takes one configuration snapshot, samples every active sensor,
//! smooths the readings, derives the formula tokens, evaluates the expected
//! water temperature and decides whether the boiler runs. The cycle works on
//! a copy of [`ControlState`]; the copy replaces the live state only when the
//! whole cycle succeeds, so a failed cycle leaves histories and the previous
//! decision untouched.

pub mod filter;
pub mod formula;
pub mod hysteresis;
pub mod tokens;

use crate::config::{ConfigProvider, ControllerConfig, Purpose, SensorSettings};
use crate::error::{BoilerError, ErrorReporter, Result};
use crate::events::{ControlEvent, DataEvent, ErrorEvent, EventBus};
use crate::sampler::Sampler;
use crate::scheduler::CycleTask;
use async_trait::async_trait;
use chrono::Utc;
use filter::MovingAverageFilter;
use formula::{Formula, Scope};
use futures::future::try_join_all;
use hysteresis::{decide, Decision, DecisionInputs, Thresholds};
use std::sync::Arc;
use tokens::{SmoothedReading, TokenSet};
use tracing::{debug, error, info, instrument};

/// State carried from one cycle to the next
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    /// Decision of the last successful cycle
    pub is_boiler_on: bool,
    pub filter: MovingAverageFilter,
}

/// Result of a successful cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub tokens: TokenSet,
    pub expected_t: f64,
    pub decision: Decision,
    pub water_avg: f64,
}

/// Run one cycle against `state`, returning the state to commit on success
pub async fn evaluate_cycle(
    state: &ControlState,
    config: &ControllerConfig,
    sampler: &dyn Sampler,
) -> Result<(ControlState, CycleOutcome)> {
    config.validate()?;

    let classified = config
        .sensors
        .iter()
        .map(|(uid, settings)| {
            settings
                .classify(uid)
                .map(|purpose| (uid.as_str(), settings, purpose))
        })
        .collect::<Result<Vec<(&str, &SensorSettings, Purpose)>>>()?;

    let active: Vec<_> = classified
        .iter()
        .filter(|(_, _, purpose)| *purpose != Purpose::None)
        .collect();

    let raw = try_join_all(
        active
            .iter()
            .map(|(uid, settings, _)| sampler.sample(uid, settings.offset_t, true)),
    )
    .await?;

    let mut next = state.clone();
    next.filter
        .retain_active(classified.iter().map(|(uid, _, purpose)| (*uid, *purpose)));

    let smoothed: Vec<SmoothedReading> = active
        .iter()
        .zip(raw)
        .map(|((uid, _, purpose), value)| SmoothedReading {
            uid: uid.to_string(),
            purpose: *purpose,
            value: next
                .filter
                .smooth(uid, value, config.history_limit(*purpose)),
        })
        .collect();

    let tokens = TokenSet::from_readings(&smoothed)?;
    let formula = Formula::parse(&config.calc_expected_temperature_formula)?;
    let expected_t = formula.evaluate(&Scope::for_cycle(&tokens, config))?;

    let inputs = DecisionInputs {
        outer_avg: tokens.average(Purpose::Outer)?,
        water_avg: tokens.average(Purpose::Water)?,
        expected_t,
    };
    let decision = decide(inputs, state.is_boiler_on, &Thresholds::from(config));
    next.is_boiler_on = decision.should_start_boiling;

    Ok((
        next,
        CycleOutcome {
            tokens,
            expected_t,
            decision,
            water_avg: inputs.water_avg,
        },
    ))
}

/// Dry evaluation of a configuration without touching any sensor
///
/// Every active sensor reads the reference indoor temperature, so the result
/// shows what the formula yields in a balanced house.
pub fn check_config(config: &ControllerConfig) -> Result<(TokenSet, f64)> {
    config.validate()?;

    let mut readings = Vec::new();
    for (uid, settings) in &config.sensors {
        let purpose = settings.classify(uid)?;
        if purpose != Purpose::None {
            readings.push(SmoothedReading {
                uid: uid.clone(),
                purpose,
                value: config.reference_inner_t,
            });
        }
    }

    let tokens = TokenSet::from_readings(&readings)?;
    let formula = Formula::parse(&config.calc_expected_temperature_formula)?;
    let expected_t = formula.evaluate(&Scope::for_cycle(&tokens, config))?;
    Ok((tokens, expected_t))
}

/// Owns the control state and publishes one event per cycle
pub struct BoilerController {
    provider: Arc<dyn ConfigProvider>,
    sampler: Arc<dyn Sampler>,
    events: EventBus,
    state: ControlState,
    cycles: u64,
}

impl BoilerController {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        sampler: Arc<dyn Sampler>,
        events: EventBus,
    ) -> Self {
        Self {
            provider,
            sampler,
            events,
            state: ControlState::default(),
            cycles: 0,
        }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Number of cycles run so far, failed ones included
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one cycle and publish its event
    #[instrument(skip(self), fields(cycle = self.cycles + 1))]
    pub async fn run_cycle(&mut self) -> ControlEvent {
        self.cycles += 1;
        let config = self.provider.snapshot().await;

        let event = match evaluate_cycle(&self.state, &config, self.sampler.as_ref()).await {
            Ok((next, outcome)) => {
                self.observe(&config, &outcome);
                self.state = next;
                ControlEvent::Data(DataEvent {
                    timestamp: Utc::now(),
                    tokens: outcome.tokens,
                    expected_t: outcome.expected_t,
                    should_start_boiling: outcome.decision.should_start_boiling,
                    rule: outcome.decision.rule,
                })
            }
            Err(e) => self.failure(e),
        };

        self.events.publish(event.clone());
        event
    }

    fn observe(&self, config: &ControllerConfig, outcome: &CycleOutcome) {
        let decision = outcome.decision;
        if decision.should_start_boiling != self.state.is_boiler_on {
            info!(
                boiler_on = decision.should_start_boiling,
                rule = ?decision.rule,
                expected_t = outcome.expected_t,
                water_avg = outcome.water_avg,
                "Boiler decision changed"
            );
        } else {
            debug!(
                boiler_on = decision.should_start_boiling,
                rule = ?decision.rule,
                expected_t = outcome.expected_t,
                "Cycle completed"
            );
        }

        if outcome.water_avg > config.critical_alarm_water_t {
            error!(
                water_avg = outcome.water_avg,
                critical_alarm_water_t = config.critical_alarm_water_t,
                "Critical water temperature"
            );
        }
    }

    fn failure(&self, e: BoilerError) -> ControlEvent {
        let context = ErrorReporter::create_context(e.to_error_code(), "control_loop", "run_cycle")
            .with_metadata("cycle", self.cycles);
        ErrorReporter::log_error(&e, Some(context.clone()));

        ControlEvent::Error(ErrorEvent {
            timestamp: Utc::now(),
            error: e.to_structured_error(Some(context)),
        })
    }
}

#[async_trait]
impl CycleTask for BoilerController {
    async fn tick(&mut self) {
        self.run_cycle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedConfig;
    use crate::control::hysteresis::Rule;
    use crate::mock::MockSampler;

    const INNER: &str = "28-01144cd685aa";
    const WATER: &str = "28-0303979405f1";
    const OUTER: &str = "28-030c979423c2";

    fn sampler(inner: f64, outer: f64, water: f64) -> MockSampler {
        MockSampler::new()
            .with_reading(INNER, inner)
            .with_reading(OUTER, outer)
            .with_reading(WATER, water)
    }

    #[tokio::test]
    async fn test_cycle_with_default_formula() {
        let config = ControllerConfig::default();
        let (next, outcome) = evaluate_cycle(
            &ControlState::default(),
            &config,
            &sampler(20.0, 0.0, 30.0),
        )
        .await
        .unwrap();

        assert_eq!(outcome.expected_t, 37.0);
        assert_eq!(outcome.decision.rule, Rule::DeficitBeyondTolerance);
        assert!(next.is_boiler_on);
        assert_eq!(outcome.tokens.get("inner1"), Some(20.0));
        assert_eq!(next.filter.tracked_sensors(), 3);
    }

    #[tokio::test]
    async fn test_offsets_are_applied_before_smoothing() {
        let mut config = ControllerConfig::default();
        config.sensors.insert(
            WATER.to_string(),
            SensorSettings::new(Purpose::Water, -1.5),
        );

        let (_, outcome) = evaluate_cycle(
            &ControlState::default(),
            &config,
            &sampler(20.0, 0.0, 30.0),
        )
        .await
        .unwrap();

        assert_eq!(outcome.tokens.get("water1"), Some(28.5));
        assert_eq!(outcome.water_avg, 28.5);
    }

    #[tokio::test]
    async fn test_none_sensors_are_not_sampled() {
        let mut config = ControllerConfig::default();
        config.sensors.insert(
            "28-spare".to_string(),
            SensorSettings::new(Purpose::None, 0.0),
        );
        let sampler = sampler(20.0, 0.0, 30.0);

        let (next, outcome) = evaluate_cycle(&ControlState::default(), &config, &sampler)
            .await
            .unwrap();

        assert_eq!(sampler.read_count(), 3);
        assert!(next.filter.history("28-spare").is_none());
        assert_eq!(outcome.tokens.len(), 6);
    }

    #[tokio::test]
    async fn test_unknown_purpose_fails_the_cycle() {
        let mut config = ControllerConfig::default();
        config.sensors.get_mut(INNER).unwrap().purpose = "ROOF".to_string();

        let result = evaluate_cycle(
            &ControlState::default(),
            &config,
            &sampler(20.0, 0.0, 30.0),
        )
        .await;

        assert!(matches!(result, Err(BoilerError::UnknownPurpose { .. })));
    }

    #[test]
    fn test_check_config_uses_reference_temperature() {
        let config = ControllerConfig::default();
        let (tokens, expected_t) = check_config(&config).unwrap();

        assert_eq!(tokens.get("outerAvg"), Some(20.0));
        // -0.5 * 20 + 37 + (20 - 20) * 1.5
        assert_eq!(expected_t, 27.0);

        let mut broken = config.clone();
        broken.calc_expected_temperature_formula = "innerAvg + attic1".to_string();
        assert!(matches!(
            check_config(&broken),
            Err(BoilerError::FormulaEvaluation(_))
        ));
    }

    #[test]
    fn test_oversized_formula_is_a_config_error() {
        let mut config = ControllerConfig::default();
        config.calc_expected_temperature_formula = format!("1{}", "+1".repeat(200_000));
        assert!(matches!(
            check_config(&config),
            Err(BoilerError::FormulaEvaluation(_))
        ));

        config.calc_expected_temperature_formula = format!("{}innerAvg", "+".repeat(200_000));
        assert!(check_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_state() {
        let provider = Arc::new(SharedConfig::default());
        let sampler = Arc::new(sampler(20.0, 0.0, 30.0));
        let mut controller = BoilerController::new(provider, sampler.clone(), EventBus::default());

        assert!(!controller.run_cycle().await.is_error());
        let committed = controller.state().clone();
        assert!(committed.is_boiler_on);

        sampler.fail(OUTER, "bus reset").await;
        let event = controller.run_cycle().await;

        match event {
            ControlEvent::Error(error) => {
                assert_eq!(error.error.code_number, 1001);
                assert_eq!(error.error.component, "control_loop");
            }
            other => panic!("Expected error event, got {other:?}"),
        }
        assert_eq!(controller.state(), &committed);
        assert_eq!(controller.cycles(), 2);
    }

    #[tokio::test]
    async fn test_each_cycle_publishes_exactly_one_event() {
        let provider = Arc::new(SharedConfig::default());
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut controller =
            BoilerController::new(provider, Arc::new(sampler(20.0, 0.0, 30.0)), bus);

        controller.tick().await;
        controller.tick().await;

        assert!(rx.try_recv().unwrap().as_data().is_some());
        assert!(rx.try_recv().unwrap().as_data().is_some());
        assert!(rx.try_recv().is_err());
    }
}
