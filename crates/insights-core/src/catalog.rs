//! Metric definitions and the catalog every meter validates against.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::attrs::{self, AttributeDefinition};
use crate::error::MetricError;

/// First code available to backend-specific metric kinds.
pub const EXTENSION_BASE: u32 = 100;

/// Past this many labels a definition is reported as a cardinality risk.
pub const MAX_LABELS_WARN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "KindRepr", into = "KindRepr")]
pub enum MetricKind {
    MonotonicCounter,
    UpDownCounter,
    Histogram,
    Distribution,
    /// Backend-specific kind, coded from [`EXTENSION_BASE`] upwards.
    Extension(u32),
    /// A kind name no backend here knows about.
    Unknown(String),
}

impl MetricKind {
    pub const COUNTERS: &'static [MetricKind] =
        &[MetricKind::MonotonicCounter, MetricKind::UpDownCounter];
    pub const OBSERVATIONS: &'static [MetricKind] =
        &[MetricKind::Histogram, MetricKind::Distribution];

    pub fn is_standard(&self) -> bool {
        matches!(
            self,
            Self::MonotonicCounter | Self::UpDownCounter | Self::Histogram | Self::Distribution
        )
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MonotonicCounter => f.write_str("counter"),
            Self::UpDownCounter => f.write_str("updowncounter"),
            Self::Histogram => f.write_str("histogram"),
            Self::Distribution => f.write_str("distribution"),
            Self::Extension(code) => write!(f, "extension({code})"),
            Self::Unknown(name) => write!(f, "unknown({name})"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Code(u32),
    Name(String),
}

impl From<KindRepr> for MetricKind {
    fn from(repr: KindRepr) -> Self {
        match repr {
            KindRepr::Code(code) => Self::Extension(code),
            KindRepr::Name(name) => match name.as_str() {
                "counter" | "monotonic_counter" => Self::MonotonicCounter,
                "updowncounter" | "up_down_counter" => Self::UpDownCounter,
                "histogram" => Self::Histogram,
                "distribution" => Self::Distribution,
                _ => Self::Unknown(name),
            },
        }
    }
}

impl From<MetricKind> for KindRepr {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Extension(code) => KindRepr::Code(code),
            MetricKind::Unknown(name) => KindRepr::Name(name),
            other => KindRepr::Name(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    #[serde(rename = "metric_type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub description: String,
    /// Attribute names accepted as dimensions.
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    /// Histogram bucket bounds; backends fall back to their defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<f64>>,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            units: String::new(),
            description: String::new(),
            attributes: Vec::new(),
            buckets: None,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<AttributeDefinition>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }
}

/// Drop empty and duplicated definitions and clean each label list.
///
/// The first definition of a name wins. Non-standard kinds are admitted with a
/// warning so backends can pick up their own extension kinds.
pub fn clean_up(defs: &[MetricDefinition]) -> (Vec<MetricDefinition>, Vec<MetricError>) {
    let mut clean: Vec<MetricDefinition> = Vec::with_capacity(defs.len());
    let mut errors = Vec::new();
    let mut seen: AHashMap<&str, usize> = AHashMap::with_capacity(defs.len());

    for (index, def) in defs.iter().enumerate() {
        if def.name.is_empty() {
            errors.push(MetricError::EmptyName { index });
            continue;
        }
        if let Some(&first) = seen.get(def.name.as_str()) {
            errors.push(MetricError::Duplicate {
                index,
                first,
                name: def.name.clone(),
            });
            continue;
        }
        seen.insert(def.name.as_str(), index);

        if !def.kind.is_standard() {
            tracing::warn!(metric = %def.name, kind = %def.kind, "non-standard metric kind admitted");
        }

        let (attributes, attr_errors) = attrs::clean_up(&def.attributes);
        errors.extend(attr_errors.into_iter().map(|source| MetricError::Attribute {
            index,
            name: def.name.clone(),
            source,
        }));
        if attributes.len() > MAX_LABELS_WARN {
            tracing::warn!(
                metric = %def.name,
                labels = attributes.len(),
                "metric has a high number of labels, watch its cardinality"
            );
        }

        let mut def = def.clone();
        def.attributes = attributes;
        clean.push(def);
    }
    (clean, errors)
}

/// Combine two definition lists.
///
/// Names in both keep `a`'s definition unless `override_existing`, in which
/// case `b`'s replaces it in place. Names only in `b` are appended.
pub fn merge(
    a: &[MetricDefinition],
    b: &[MetricDefinition],
    override_existing: bool,
) -> Vec<MetricDefinition> {
    let (b, errors) = clean_up(b);
    for e in &errors {
        tracing::warn!(error = %e, "merged metric definition dropped");
    }
    let mut out: Vec<MetricDefinition> = a.to_vec();
    let mut positions: AHashMap<String, usize> = out
        .iter()
        .enumerate()
        .rev()
        .map(|(i, d)| (d.name.clone(), i))
        .collect();

    for def in &b {
        match positions.get(&def.name) {
            Some(&i) => {
                if override_existing {
                    out[i] = def.clone();
                }
            }
            None => {
                positions.insert(def.name.clone(), out.len());
                out.push(def.clone());
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// MetricCatalog
// ---------------------------------------------------------------------------

/// Validated metric definitions indexed by name. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct MetricCatalog {
    defs: Vec<MetricDefinition>,
    index: AHashMap<String, usize>,
}

impl MetricCatalog {
    pub fn build(defs: &[MetricDefinition]) -> (Self, Vec<MetricError>) {
        let (defs, errors) = clean_up(defs);
        let index = defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        (Self { defs, index }, errors)
    }

    /// Definition for `name` if its kind is one of `allowed`.
    pub fn def(&self, name: &str, allowed: &[MetricKind]) -> Result<&MetricDefinition, MetricError> {
        self.lookup(name, allowed).map(|(_, d)| d)
    }

    /// Like [`def`](Self::def), also returning the definition's position.
    pub fn lookup(
        &self,
        name: &str,
        allowed: &[MetricKind],
    ) -> Result<(usize, &MetricDefinition), MetricError> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| MetricError::NotFound(name.to_owned()))?;
        let def = &self.defs[i];
        if !allowed.is_empty() && !allowed.contains(&def.kind) {
            return Err(MetricError::WrongKind {
                name: name.to_owned(),
                kind: def.kind.clone(),
            });
        }
        Ok((i, def))
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.defs
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_name_and_code() {
        let k: MetricKind = serde_json::from_str(r#""counter""#).unwrap();
        assert_eq!(k, MetricKind::MonotonicCounter);
        let k: MetricKind = serde_json::from_str("101").unwrap();
        assert_eq!(k, MetricKind::Extension(101));
        let k: MetricKind = serde_json::from_str(r#""summary""#).unwrap();
        assert_eq!(k, MetricKind::Unknown("summary".into()));
        assert_eq!(serde_json::to_string(&MetricKind::UpDownCounter).unwrap(), r#""updowncounter""#);
    }

    #[test]
    fn test_unknown_kind_admitted() {
        let defs = vec![MetricDefinition::new("custom", MetricKind::Extension(EXTENSION_BASE))];
        let (catalog, errors) = MetricCatalog::build(&defs);
        assert!(errors.is_empty());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_label_duplicates_reported() {
        let def = MetricDefinition::new("m", MetricKind::Histogram).with_attributes(vec![
            AttributeDefinition::str("a"),
            AttributeDefinition::str("a"),
        ]);
        let (catalog, errors) = MetricCatalog::build(&[def]);
        assert_eq!(catalog.definitions()[0].attributes.len(), 1);
        assert!(matches!(errors[0], MetricError::Attribute { index: 0, .. }));
    }

    #[test]
    fn test_empty_allowed_matches_any_kind() {
        let (catalog, _) = MetricCatalog::build(&[MetricDefinition::new("m", MetricKind::Distribution)]);
        assert!(catalog.def("m", &[]).is_ok());
    }

    #[test]
    fn test_merge_keeps_a_order() {
        let a = vec![
            MetricDefinition::new("x", MetricKind::MonotonicCounter),
            MetricDefinition::new("y", MetricKind::Histogram),
        ];
        let b = vec![
            MetricDefinition::new("z", MetricKind::Histogram),
            MetricDefinition::new("x", MetricKind::UpDownCounter),
        ];
        let names: Vec<_> = merge(&a, &b, true).into_iter().map(|d| (d.name, d.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("x".to_string(), MetricKind::UpDownCounter),
                ("y".to_string(), MetricKind::Histogram),
                ("z".to_string(), MetricKind::Histogram),
            ]
        );
    }
}
