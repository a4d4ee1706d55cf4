//! Combines per-strategy signals into one trade decision.

use tracing::debug;

use arbiter_core::{Action, Decision, Signal, Symbol};

/// Vote thresholds. Entry and exit are configured independently because
/// paper and live profiles disagree on the right level; exits always use
/// the (lower) exit threshold so winding down is easier than entering.
#[derive(Clone, Copy, Debug)]
pub struct AggregatorConfig {
    pub entry_threshold: f64,
    pub exit_threshold: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            entry_threshold: 0.4,
            exit_threshold: 0.2,
        }
    }
}

/// Deterministic weighted-vote aggregator.
///
/// For the same ordered `(weight, signal)` list and config the decision
/// is always identical: no wall-clock reads, no map iteration.
pub struct SignalAggregator {
    config: AggregatorConfig,
}

impl SignalAggregator {
    #[must_use]
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Fold the weighted signals for one symbol into a decision.
    ///
    /// `closing` selects the exit threshold, used when the engine is
    /// evaluating whether to unwind an existing position. A hard-exit
    /// signal from any single strategy overrides the vote entirely.
    #[must_use]
    pub fn aggregate(
        &self,
        symbol: impl Into<Symbol>,
        weighted: &[(f64, Signal)],
        closing: bool,
    ) -> Decision {
        let symbol = symbol.into();
        if let Some((_, priority)) = weighted
            .iter()
            .find(|(_, signal)| signal.hard_exit && signal.action != Action::Hold)
        {
            debug!(
                symbol = %symbol,
                strategy = %priority.strategy,
                "priority exit overrides aggregate vote"
            );
            return Decision {
                symbol,
                action: priority.action,
                confidence: priority.confidence,
                score: priority.action.vote_sign() * priority.confidence,
                contributing: vec![priority.clone()],
            };
        }

        let total_weight: f64 = weighted.iter().map(|(weight, _)| *weight).sum();
        if total_weight <= 0.0 {
            return Decision::hold(symbol);
        }
        let score: f64 = weighted
            .iter()
            .map(|(weight, signal)| weight * signal.confidence * signal.action.vote_sign())
            .sum::<f64>()
            / total_weight;

        let threshold = if closing {
            self.config.exit_threshold
        } else {
            self.config.entry_threshold
        };

        // An exact tie has no direction and resolves to hold.
        let action = if score == 0.0 || score.abs() < threshold {
            Action::Hold
        } else if score > 0.0 {
            Action::Buy
        } else {
            Action::Sell
        };

        let contributing: Vec<Signal> = weighted
            .iter()
            .filter(|(weight, signal)| *weight > 0.0 && signal.action != Action::Hold)
            .map(|(_, signal)| signal.clone())
            .collect();

        Decision {
            symbol,
            action,
            confidence: score.abs().min(1.0),
            score,
            contributing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(action: Action, confidence: f64) -> Signal {
        Signal::new("test", action, confidence)
    }

    fn aggregator() -> SignalAggregator {
        SignalAggregator::new(AggregatorConfig {
            entry_threshold: 0.4,
            exit_threshold: 0.2,
        })
    }

    #[test]
    fn disagreement_below_entry_threshold_holds() {
        // (0.8 + 0.6 - 0.9) / 3 ~= 0.167 < 0.4 -> hold.
        let weighted = vec![
            (1.0, signal(Action::Buy, 0.8)),
            (1.0, signal(Action::Buy, 0.6)),
            (1.0, signal(Action::Sell, 0.9)),
        ];
        let decision = aggregator().aggregate("AAPL", &weighted, false);
        assert_eq!(decision.action, Action::Hold);
        assert!((decision.score - 0.1666).abs() < 0.001);
    }

    #[test]
    fn same_vote_clears_the_lower_exit_threshold() {
        let weighted = vec![
            (1.0, signal(Action::Buy, 0.8)),
            (1.0, signal(Action::Buy, 0.6)),
            (1.0, signal(Action::Sell, 0.9)),
        ];
        let decision = aggregator().aggregate("AAPL", &weighted, true);
        assert_eq!(decision.action, Action::Hold);

        let weighted = vec![
            (1.0, signal(Action::Sell, 0.5)),
            (1.0, signal(Action::Hold, 0.0)),
            (1.0, signal(Action::Sell, 0.4)),
        ];
        let decision = aggregator().aggregate("AAPL", &weighted, true);
        assert_eq!(decision.action, Action::Sell);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let weighted = vec![
            (2.0, signal(Action::Buy, 0.9)),
            (1.0, signal(Action::Sell, 0.3)),
            (0.5, signal(Action::Hold, 0.0)),
        ];
        let first = aggregator().aggregate("AAPL", &weighted, false);
        for _ in 0..10 {
            let again = aggregator().aggregate("AAPL", &weighted, false);
            assert_eq!(again.action, first.action);
            assert_eq!(again.score, first.score);
            assert_eq!(again.confidence, first.confidence);
        }
    }

    #[test]
    fn exact_tie_resolves_to_hold() {
        let weighted = vec![
            (1.0, signal(Action::Buy, 0.9)),
            (1.0, signal(Action::Sell, 0.9)),
        ];
        let decision = aggregator().aggregate("AAPL", &weighted, false);
        assert_eq!(decision.action, Action::Hold);
        assert_eq!(decision.score, 0.0);
    }

    #[test]
    fn hard_exit_overrides_opposing_majority() {
        let exit = Signal::new("protective-stops", Action::Sell, 1.0).into_hard_exit();
        let weighted = vec![
            (1.0, signal(Action::Buy, 0.9)),
            (1.0, signal(Action::Buy, 0.9)),
            (1.0, exit),
        ];
        let decision = aggregator().aggregate("AAPL", &weighted, false);
        assert_eq!(decision.action, Action::Sell);
        assert_eq!(decision.contributing.len(), 1);
        assert_eq!(decision.contributing[0].strategy, "protective-stops");
    }

    #[test]
    fn zero_total_weight_holds() {
        let weighted = vec![(0.0, signal(Action::Buy, 1.0))];
        let decision = aggregator().aggregate("AAPL", &weighted, false);
        assert_eq!(decision.action, Action::Hold);
    }
}
