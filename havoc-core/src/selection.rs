//! Target container selection.
//!
//! A [`SelectionPolicy`] is validated once per invocation and then applied
//! to a fresh container listing on every tick via [`SelectionPolicy::select`].
//!
//! # Example
//!
//! ```
//! use havoc_core::selection::{SelectionPolicy, Targets};
//! use havoc_types::Container;
//!
//! let policy = SelectionPolicy::builder()
//!     .targets(Targets::Names(vec!["c1".into()]))
//!     .build()
//!     .unwrap();
//!
//! let candidates = vec![
//!     Container::builder("a").name("/c1").build(),
//!     Container::builder("b").name("/c2").build(),
//! ];
//! let picked = policy.select(candidates, &mut rand::thread_rng());
//! assert_eq!(picked.len(), 1);
//! assert_eq!(picked[0].id(), "a");
//! ```

use havoc_types::{Container, LabelSelector, ListOptions};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use crate::error::SelectionError;

/// Prefix marking a positional target as a regular expression.
pub const PATTERN_PREFIX: &str = "re2:";

/// How targets were named on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Targets {
    /// Every container (after label and exclusion filtering).
    #[default]
    All,
    /// Explicit container names or IDs.
    Names(Vec<String>),
    /// Regular expression over container names.
    Pattern(String),
}

impl Targets {
    /// Interpret positional target arguments.
    ///
    /// A single argument starting with `re2:` is a pattern; any other
    /// non-empty list is a list of names; no arguments means all containers.
    pub fn from_args(args: &[String]) -> Self {
        match args {
            [] => Self::All,
            [single] if single.starts_with(PATTERN_PREFIX) => {
                Self::Pattern(single[PATTERN_PREFIX.len()..].to_string())
            }
            names => Self::Names(names.to_vec()),
        }
    }
}

/// Validated target selection policy.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    names: Vec<String>,
    pattern: Option<Regex>,
    labels: Vec<String>,
    selectors: Vec<LabelSelector>,
    limit: usize,
    random: bool,
}

impl SelectionPolicy {
    /// Start building a policy.
    pub fn builder() -> SelectionPolicyBuilder {
        SelectionPolicyBuilder::default()
    }

    /// Policy that matches every non-excluded container.
    pub fn all() -> Self {
        Self {
            names: Vec::new(),
            pattern: None,
            labels: Vec::new(),
            selectors: Vec::new(),
            limit: 0,
            random: false,
        }
    }

    /// Explicit names, if any.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Pattern source, if any.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    /// Maximum number of targets (0 = unlimited).
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether a single random target is picked.
    pub fn random(&self) -> bool {
        self.random
    }

    /// Engine-side listing options for this policy.
    ///
    /// Labels are pushed down so the engine can filter server-side.
    pub fn list_options(&self, all: bool) -> ListOptions {
        ListOptions {
            all,
            labels: self.labels.clone(),
        }
    }

    /// True if the container passes exclusion, label and name/pattern checks.
    pub fn matches(&self, container: &Container) -> bool {
        if container.is_excluded() {
            return false;
        }
        if !self.selectors.iter().all(|s| s.matches(container)) {
            return false;
        }
        if !self.names.is_empty() {
            return self.names.iter().any(|wanted| {
                let wanted_norm = wanted.strip_prefix('/').unwrap_or(wanted);
                wanted == container.id()
                    || wanted == container.name()
                    || wanted_norm == container.normalized_name()
            });
        }
        match &self.pattern {
            Some(re) => re.is_match(container.name()) || re.is_match(container.normalized_name()),
            None => true,
        }
    }

    /// Reduce a fresh listing to the containers to disrupt.
    ///
    /// Random picks exactly one matching container. Otherwise a positive
    /// limit takes a uniformly random subset of that size, never a stable
    /// prefix of the listing.
    pub fn select<R: Rng + ?Sized>(&self, candidates: Vec<Container>, rng: &mut R) -> Vec<Container> {
        let mut matched: Vec<Container> = candidates
            .into_iter()
            .filter(|c| self.matches(c))
            .collect();

        if self.random {
            return matched.choose(rng).cloned().into_iter().collect();
        }

        if self.limit > 0 && matched.len() > self.limit {
            let (picked, _) = matched.partial_shuffle(rng, self.limit);
            return picked.to_vec();
        }

        matched
    }
}

/// Builder for [`SelectionPolicy`].
#[derive(Debug, Clone, Default)]
pub struct SelectionPolicyBuilder {
    names: Vec<String>,
    pattern: Option<String>,
    labels: Vec<String>,
    limit: usize,
    random: bool,
}

impl SelectionPolicyBuilder {
    /// Set names or pattern from parsed [`Targets`].
    pub fn targets(mut self, targets: Targets) -> Self {
        match targets {
            Targets::All => {}
            Targets::Names(names) => self.names.extend(names),
            Targets::Pattern(pattern) => self.pattern = Some(pattern),
        }
        self
    }

    /// Add explicit names.
    pub fn names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.names.extend(names);
        self
    }

    /// Set the name pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Add label selectors. Each entry may hold a comma-separated list.
    pub fn labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Limit the number of targets (0 = unlimited).
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Pick a single random target.
    pub fn random(mut self, random: bool) -> Self {
        self.random = random;
        self
    }

    /// Validate and build the policy.
    pub fn build(self) -> Result<SelectionPolicy, SelectionError> {
        let names: Vec<String> = self
            .names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let pattern = self.pattern.filter(|p| !p.is_empty());

        if !names.is_empty() && pattern.is_some() {
            return Err(SelectionError::NamesAndPattern);
        }

        let pattern = pattern
            .map(|p| {
                Regex::new(&p).map_err(|source| SelectionError::BadPattern { pattern: p, source })
            })
            .transpose()?;

        let labels: Vec<String> = self
            .labels
            .iter()
            .flat_map(|l| l.split(','))
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        let selectors = labels
            .iter()
            .map(|l| l.parse::<LabelSelector>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SelectionPolicy {
            names,
            pattern,
            labels,
            selectors,
            limit: self.limit,
            random: self.random,
        })
    }
}
