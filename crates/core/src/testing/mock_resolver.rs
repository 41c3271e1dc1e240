//! Mock resolver for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::resolver::{ResolveError, Resolver};

#[derive(Debug, Clone)]
enum Outcome {
    Url(String),
    Unresolvable(String),
}

#[derive(Debug, Default)]
struct State {
    outcomes: HashMap<String, Outcome>,
    /// Remaining transient timeouts per source.
    transient: HashMap<String, u32>,
    calls: Vec<String>,
}

/// Mock implementation of the Resolver trait.
///
/// Unconfigured sources resolve to `<source>/direct`.
#[derive(Debug, Default)]
pub struct MockResolver {
    state: Mutex<State>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_url(&self, source: &str, direct_url: &str) {
        self.state()
            .outcomes
            .insert(source.to_string(), Outcome::Url(direct_url.to_string()));
    }

    /// Permanently fail `source`.
    pub fn fail(&self, source: &str, message: &str) {
        self.state().outcomes.insert(
            source.to_string(),
            Outcome::Unresolvable(message.to_string()),
        );
    }

    /// Time out the next `times` calls for `source`.
    pub fn fail_transient(&self, source: &str, times: u32) {
        self.state().transient.insert(source.to_string(), times);
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn calls_for(&self, source: &str) -> usize {
        self.state().calls.iter().filter(|s| *s == source).count()
    }
}

#[async_trait]
impl Resolver for MockResolver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, source_url: &str) -> Result<String, ResolveError> {
        let mut state = self.state();
        state.calls.push(source_url.to_string());

        if let Some(remaining) = state.transient.get_mut(source_url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ResolveError::Timeout);
            }
        }

        match state.outcomes.get(source_url) {
            Some(Outcome::Url(url)) => Ok(url.clone()),
            Some(Outcome::Unresolvable(message)) => Err(ResolveError::Unresolvable(message.clone())),
            None => Ok(format!("{}/direct", source_url.trim_end_matches('/'))),
        }
    }
}
