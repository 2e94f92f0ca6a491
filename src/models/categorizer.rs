//! Multinomial Naive Bayes categorizer over description tokens

use crate::config::CategorizerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::feature_extractor::tokenize;
use crate::models::{CategoryModel, Estimator, Fitted};
use crate::types::prediction::{CategoryPrediction, Contribution};
use crate::types::transaction::Transaction;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Tokens reported in a prediction's explanation
const MAX_EXPLAINED_TERMS: usize = 5;

/// Text classifier with a label set fixed at training time.
pub struct NaiveBayesCategorizer {
    /// Sorted, so index order is lexical order
    labels: Vec<String>,
    log_priors: Vec<f64>,
    /// term -> log P(term | label), indexed like `labels`
    term_log_probs: HashMap<String, Vec<f64>>,
    bigrams: bool,
}

impl NaiveBayesCategorizer {
    /// Fit on (description, label) pairs.
    pub fn train<'a, I>(examples: I, config: &CategorizerConfig) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut docs_per_label: BTreeMap<String, usize> = BTreeMap::new();
        let mut term_counts: BTreeMap<String, HashMap<String, f64>> = BTreeMap::new();
        let mut vocabulary: BTreeSet<String> = BTreeSet::new();

        for (description, label) in examples {
            *docs_per_label.entry(label.to_string()).or_insert(0) += 1;
            let counts = term_counts.entry(label.to_string()).or_default();
            for term in terms(description, config.bigrams) {
                vocabulary.insert(term.clone());
                *counts.entry(term).or_insert(0.0) += 1.0;
            }
        }

        if docs_per_label.is_empty() {
            return Err(PipelineError::InsufficientData(
                "categorizer needs at least one labeled example".to_string(),
            ));
        }

        let total_docs: usize = docs_per_label.values().sum();
        let labels: Vec<String> = docs_per_label.keys().cloned().collect();
        let log_priors = docs_per_label
            .values()
            .map(|&count| (count as f64 / total_docs as f64).ln())
            .collect();

        let alpha = config.alpha;
        let vocab_size = vocabulary.len() as f64;
        let denominators: Vec<f64> = labels
            .iter()
            .map(|label| {
                let total: f64 = term_counts.get(label).map_or(0.0, |c| c.values().sum());
                total + alpha * vocab_size
            })
            .collect();

        let term_log_probs = vocabulary
            .into_iter()
            .map(|term| {
                let per_label = labels
                    .iter()
                    .zip(&denominators)
                    .map(|(label, denominator)| {
                        let count = term_counts
                            .get(label)
                            .and_then(|c| c.get(&term))
                            .copied()
                            .unwrap_or(0.0);
                        ((count + alpha) / denominator).ln()
                    })
                    .collect();
                (term, per_label)
            })
            .collect();

        Ok(Self {
            labels,
            log_priors,
            term_log_probs,
            bigrams: config.bigrams,
        })
    }

    /// Fit on a user's manually labeled transactions.
    ///
    /// Predicted categories are never fed back as training data.
    pub fn fit(
        transactions: &[Transaction],
        config: &CategorizerConfig,
        min_examples: usize,
    ) -> PipelineResult<Fitted> {
        let examples: Vec<(&str, &str)> = transactions
            .iter()
            .filter_map(|tx| tx.manual_category().map(|c| (tx.description.as_str(), c)))
            .collect();

        if examples.len() < min_examples {
            return Err(PipelineError::InsufficientData(format!(
                "categorizer needs {} labeled transactions, found {}",
                min_examples,
                examples.len()
            )));
        }

        let model = Self::train(examples.iter().copied(), config)?;

        let correct = examples
            .iter()
            .filter(|(description, label)| model.predict(description).category == *label)
            .count();
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "training_accuracy".to_string(),
            correct as f64 / examples.len() as f64,
        );
        metrics.insert("labels".to_string(), model.labels().len() as f64);
        metrics.insert("vocabulary".to_string(), model.term_log_probs.len() as f64);

        debug!(
            examples = examples.len(),
            labels = model.labels.len(),
            vocabulary = model.term_log_probs.len(),
            "Categorizer fitted"
        );

        Ok(Fitted {
            samples: examples.len(),
            metrics,
            estimator: Estimator::Categorizer(Box::new(model)),
        })
    }

    /// Labels fixed at training time, in lexical order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Unnormalized log posterior per label.
    fn log_scores(&self, known_terms: &[&Vec<f64>]) -> Vec<f64> {
        let mut scores = self.log_priors.clone();
        for per_label in known_terms {
            for (score, log_prob) in scores.iter_mut().zip(per_label.iter()) {
                *score += log_prob;
            }
        }
        scores
    }
}

impl CategoryModel for NaiveBayesCategorizer {
    fn predict(&self, description: &str) -> CategoryPrediction {
        // Out-of-vocabulary terms carry no evidence
        let known: Vec<(String, &Vec<f64>)> = terms(description, self.bigrams)
            .into_iter()
            .filter_map(|term| self.term_log_probs.get(&term).map(|p| (term, p)))
            .collect();
        let per_term: Vec<&Vec<f64>> = known.iter().map(|(_, p)| *p).collect();
        let scores = self.log_scores(&per_term);

        // Strict comparison keeps the lexically first label on ties
        let mut best = 0;
        for (index, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[best] {
                best = index;
            }
        }

        let max = scores[best];
        let normalizer: f64 = scores.iter().map(|s| (s - max).exp()).sum();
        let confidence = 1.0 / normalizer;

        let mut seen = BTreeSet::new();
        let mut explanation: Vec<Contribution> = known
            .iter()
            .filter(|(term, _)| seen.insert(term.clone()))
            .filter_map(|(term, per_label)| {
                let rival = per_label
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| *index != best)
                    .map(|(_, p)| *p)
                    .fold(f64::NEG_INFINITY, f64::max);
                let margin = per_label[best] - rival;
                (margin > 0.0).then(|| Contribution::new(term.clone(), margin))
            })
            .collect();
        explanation.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.feature.cmp(&b.feature))
        });
        explanation.truncate(MAX_EXPLAINED_TERMS);

        CategoryPrediction {
            category: self.labels[best].clone(),
            confidence,
            explanation,
        }
    }
}

/// Unigrams, plus adjacent bigrams when enabled. Digit runs become `num`
/// so reference numbers share one term.
fn terms(description: &str, bigrams: bool) -> Vec<String> {
    let tokens: Vec<String> = tokenize(description)
        .iter()
        .map(|token| collapse_digits(token))
        .collect();
    let mut terms = tokens.clone();
    if bigrams {
        terms.extend(tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
    }
    terms
}

fn collapse_digits(token: &str) -> String {
    let mut collapsed = String::with_capacity(token.len());
    let mut in_digits = false;
    for c in token.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                collapsed.push_str("num");
            }
            in_digits = true;
        } else {
            collapsed.push(c);
            in_digits = false;
        }
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CategorizerConfig {
        CategorizerConfig {
            alpha: 0.1,
            bigrams: true,
        }
    }

    fn sample_model() -> NaiveBayesCategorizer {
        let examples = [
            ("Starbucks Coffee", "Food & Dining"),
            ("Restaurant Dinner", "Food & Dining"),
            ("Uber Ride Downtown", "Transportation"),
            ("Shell Gas Station", "Transportation"),
            ("Netflix Subscription", "Entertainment"),
            ("Movie Theater Tickets", "Entertainment"),
        ];
        NaiveBayesCategorizer::train(examples, &config()).unwrap()
    }

    #[test]
    fn test_predicts_known_vocabulary() {
        let model = sample_model();

        let prediction = model.predict("UBER *RIDE 8832");
        assert_eq!(prediction.category, "Transportation");
        assert!(prediction.confidence > 0.5);
        assert!(prediction.explanation.iter().any(|c| c.feature == "uber"));

        let prediction = model.predict("netflix.com subscription");
        assert_eq!(prediction.category, "Entertainment");
    }

    #[test]
    fn test_prediction_stays_in_label_set() {
        let model = sample_model();
        let labels = model.labels().to_vec();

        for description in ["", "!!!", "zzz unknown words", "coffee ride movie", "1234"] {
            let prediction = model.predict(description);
            assert!(labels.contains(&prediction.category));
            assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);
        }
    }

    #[test]
    fn test_confidence_is_normalized() {
        let model = sample_model();
        // Equal priors and no known terms: uniform posterior
        let prediction = model.predict("nothing familiar");
        assert!((prediction.confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_break_lexically() {
        let examples = [("shared words", "Zeta"), ("shared words", "Alpha")];
        let model = NaiveBayesCategorizer::train(examples, &config()).unwrap();

        let prediction = model.predict("shared words");
        assert_eq!(prediction.category, "Alpha");
        assert!((prediction.confidence - 0.5).abs() < 1e-9);
        assert!(prediction.explanation.is_empty());
    }

    #[test]
    fn test_labels_sorted() {
        let model = sample_model();
        assert_eq!(
            model.labels(),
            &["Entertainment", "Food & Dining", "Transportation"]
        );
    }

    #[test]
    fn test_empty_training_set() {
        let examples: Vec<(&str, &str)> = Vec::new();
        assert!(matches!(
            NaiveBayesCategorizer::train(examples, &config()),
            Err(PipelineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_terms_with_bigrams() {
        assert_eq!(
            terms("Whole Foods Market", true),
            vec!["whole", "foods", "market", "whole foods", "foods market"]
        );
        assert_eq!(terms("Whole Foods", false), vec!["whole", "foods"]);
    }

    #[test]
    fn test_digit_runs_collapse() {
        assert_eq!(
            terms("GROCERIES #4521", true),
            vec!["groceries", "num", "groceries num"]
        );
        assert_eq!(terms("7eleven 24h", false), vec!["numeleven", "numh"]);
    }

    #[test]
    fn test_reference_numbers_add_evidence() {
        let examples = [
            ("GROCERIES #1001", "Groceries"),
            ("Groceries Delivery", "Delivery"),
            ("Delivery Fee", "Delivery"),
        ];
        let model = NaiveBayesCategorizer::train(examples, &config()).unwrap();

        let prediction = model.predict("GROCERIES #8842");
        assert_eq!(prediction.category, "Groceries");
        assert!(prediction.explanation.iter().any(|c| c.feature == "groceries num"));
    }
}
