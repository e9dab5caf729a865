//! Experiment insights aggregation.
//!
//! Folds RUM bundles into a report keyed by page URL, then by normalized
//! experiment name, then by variant name:
//!
//! ```text
//! "/products" → [
//!   { experiment: "hero-test", variants: [
//!       { name: "control",      views: 80, clicks: {".cta": 30}, conversions: {} },
//!       { name: "challenger-1", views: 20, clicks: {},           conversions: {"form": 20} },
//!   ]},
//! ]
//! ```
//!
//! Every level keeps first-seen order. Lookups use `IndexMap` entries so a key
//! is created at most once per level.

use crate::types::{Event, RumBundle, checkpoint};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VariantInsight {
    pub name: String,
    pub views: u64,
    pub clicks: IndexMap<String, u64>,
    pub conversions: IndexMap<String, u64>,
}

impl VariantInsight {
    pub fn new<N: Into<String>>(name: N) -> Self {
        VariantInsight {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn total_clicks(&self) -> u64 {
        self.clicks.values().sum()
    }

    pub fn total_conversions(&self) -> u64 {
        self.conversions.values().sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExperimentInsight {
    pub experiment: String,
    #[serde(serialize_with = "values_as_seq")]
    variants: IndexMap<String, VariantInsight>,
}

impl ExperimentInsight {
    pub fn new<N: Into<String>>(experiment: N) -> Self {
        ExperimentInsight {
            experiment: experiment.into(),
            variants: IndexMap::new(),
        }
    }

    /// Returns the variant called `name`, appending it if it is new.
    pub fn variant_entry(&mut self, name: &str) -> &mut VariantInsight {
        self.variants
            .entry(name.to_string())
            .or_insert_with(|| VariantInsight::new(name))
    }

    pub fn variant(&self, name: &str) -> Option<&VariantInsight> {
        self.variants.get(name)
    }

    pub fn variants(&self) -> impl Iterator<Item = &VariantInsight> {
        self.variants.values()
    }

    pub fn total_views(&self) -> u64 {
        self.variants.values().map(|v| v.views).sum()
    }
}

/// Experiments observed on a single page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageInsights {
    experiments: IndexMap<String, ExperimentInsight>,
}

impl PageInsights {
    /// Returns the experiment with this (already normalized) name, appending
    /// it if it is new.
    pub fn experiment_entry(&mut self, name: &str) -> &mut ExperimentInsight {
        self.experiments
            .entry(name.to_string())
            .or_insert_with(|| ExperimentInsight::new(name))
    }

    pub fn experiment(&self, name: &str) -> Option<&ExperimentInsight> {
        self.experiments.get(name)
    }

    pub fn experiments(&self) -> impl Iterator<Item = &ExperimentInsight> {
        self.experiments.values()
    }
}

impl Serialize for PageInsights {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.experiments.values())
    }
}

/// Report handed to the caller: page URL → experiments on that page.
///
/// Equality ignores key order; two reports are equal when they hold the same
/// counts under the same keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InsightReport {
    pages: IndexMap<String, PageInsights>,
}

impl InsightReport {
    pub fn page_entry(&mut self, url: &str) -> &mut PageInsights {
        self.pages.entry(url.to_string()).or_default()
    }

    pub fn page(&self, url: &str) -> Option<&PageInsights> {
        self.pages.get(url)
    }

    pub fn pages(&self) -> impl Iterator<Item = (&str, &PageInsights)> {
        self.pages.iter().map(|(url, page)| (url.as_str(), page))
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn experiment_count(&self) -> usize {
        self.pages.values().map(|p| p.experiments.len()).sum()
    }

    pub fn total_views(&self) -> u64 {
        self.pages
            .values()
            .flat_map(|p| p.experiments())
            .map(ExperimentInsight::total_views)
            .sum()
    }
}

fn values_as_seq<S, V>(map: &IndexMap<String, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    serializer.collect_seq(map.values())
}

/// Turns a raw experiment name into its grouping key: ASCII lower-case, each
/// run of other characters collapsed into one `-`, none at either end.
///
/// `"My Test!!"` becomes `"my-test"`.
pub fn normalize_experiment_name(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut separator_pending = false;

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if separator_pending && !normalized.is_empty() {
                normalized.push('-');
            }
            separator_pending = false;
            normalized.push(ch.to_ascii_lowercase());
        } else {
            separator_pending = true;
        }
    }

    normalized
}

/// The first element satisfying `predicate`.
///
/// A bundle's experiment assignment is its first `experiment` event. Later
/// experiment events in the same bundle are ignored.
pub fn first_matching<T, P>(items: &[T], predicate: P) -> Option<&T>
where
    P: Fn(&T) -> bool,
{
    items.iter().find(|item| predicate(*item))
}

#[derive(Clone, Debug)]
pub struct InsightAggregator {
    click_checkpoint: String,
    conversion_checkpoint: String,
}

impl Default for InsightAggregator {
    fn default() -> Self {
        InsightAggregator {
            click_checkpoint: checkpoint::CLICK.to_string(),
            conversion_checkpoint: checkpoint::CONVERT.to_string(),
        }
    }
}

impl InsightAggregator {
    pub fn with_checkpoints<C, V>(click_checkpoint: C, conversion_checkpoint: V) -> Self
    where
        C: Into<String>,
        V: Into<String>,
    {
        InsightAggregator {
            click_checkpoint: click_checkpoint.into(),
            conversion_checkpoint: conversion_checkpoint.into(),
        }
    }

    pub fn click_checkpoint(&self) -> &str {
        &self.click_checkpoint
    }

    pub fn conversion_checkpoint(&self) -> &str {
        &self.conversion_checkpoint
    }

    /// Builds a fresh report from `bundles`. Bundles without an experiment
    /// event are skipped.
    pub fn aggregate<'a, I>(&self, bundles: I) -> InsightReport
    where
        I: IntoIterator<Item = &'a RumBundle>,
    {
        let mut report = InsightReport::default();

        for bundle in bundles {
            let Some(assignment) = first_matching(&bundle.events, is_experiment) else {
                continue;
            };

            let experiment = normalize_experiment_name(&assignment.source);
            let variant = report
                .page_entry(&bundle.url)
                .experiment_entry(&experiment)
                .variant_entry(&assignment.target);

            variant.views += bundle.weight;

            for event in &bundle.events {
                let counts = if event.checkpoint == self.click_checkpoint {
                    &mut variant.clicks
                } else if event.checkpoint == self.conversion_checkpoint {
                    &mut variant.conversions
                } else {
                    continue;
                };
                *counts.entry(event.source.clone()).or_insert(0) += bundle.weight;
            }
        }

        report
    }
}

fn is_experiment(event: &Event) -> bool {
    event.checkpoint == checkpoint::EXPERIMENT
}
