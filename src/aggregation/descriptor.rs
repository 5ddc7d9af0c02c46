//! Feed descriptors: which feeds to open and which rule reduces each one.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::config::FeedSettings;

use super::rules::{AggregationRule, ClassifyingRule, CountingRule};
use super::stats::Counter;

/// One feed to subscribe to and the rule that reduces its snapshots
#[derive(Debug, Clone)]
pub struct FeedDescriptor {
    pub name: String,
    pub rule: Arc<dyn AggregationRule>,
}

impl FeedDescriptor {
    pub fn new(name: impl Into<String>, rule: impl AggregationRule + 'static) -> Self {
        Self {
            name: name.into(),
            rule: Arc::new(rule),
        }
    }

    pub fn counting(name: impl Into<String>, counter: Counter) -> Self {
        Self::new(name, CountingRule::new(counter))
    }
}

/// Rejected descriptor sets
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Feed '{0}' is configured more than once")]
    DuplicateFeed(String),

    #[error("Counter '{counter}' is written by both '{first}' and '{second}'")]
    OverlappingCounter {
        counter: Counter,
        first: String,
        second: String,
    },
}

/// The dashboard's fixed feed set: users, profiles, flags, comments
pub fn default_descriptors(feeds: &FeedSettings) -> Vec<FeedDescriptor> {
    vec![
        FeedDescriptor::new(
            feeds.users.clone(),
            ClassifyingRule::user_verification(feeds.status_field.clone()),
        ),
        FeedDescriptor::counting(feeds.profiles.clone(), Counter::TotalProfiles),
        FeedDescriptor::counting(feeds.flags.clone(), Counter::TotalFlags),
        FeedDescriptor::counting(feeds.comments.clone(), Counter::TotalComments),
    ]
}

/// Check that feed names are unique and that no two rules write the same
/// counter. Merge order across feeds only stops mattering once this holds.
pub fn validate_descriptors(descriptors: &[FeedDescriptor]) -> Result<(), DescriptorError> {
    let mut names = HashSet::new();
    let mut owners: Vec<(Counter, &str)> = Vec::new();

    for descriptor in descriptors {
        if !names.insert(descriptor.name.as_str()) {
            return Err(DescriptorError::DuplicateFeed(descriptor.name.clone()));
        }

        for counter in descriptor.rule.owned_counters() {
            if let Some((_, owner)) = owners.iter().find(|(c, _)| c == counter) {
                return Err(DescriptorError::OverlappingCounter {
                    counter: *counter,
                    first: owner.to_string(),
                    second: descriptor.name.clone(),
                });
            }
            owners.push((*counter, descriptor.name.as_str()));
        }
    }

    Ok(())
}
