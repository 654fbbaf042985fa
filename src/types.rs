//! Core domain types shared by every pipeline stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

const FORM_FEATURES: [&str; 4] = [
    "home_form_score",
    "away_form_score",
    "form_differential",
    "combined_form_score",
];

/// Betting market a model family is trained for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// Total goals over 2.5
    Goals,
    /// Both teams to score
    Btts,
    /// Total cards over 3.5
    Cards,
    /// Total corners over 9.5
    Corners,
}

impl Market {
    pub const ALL: [Market; 4] = [Market::Goals, Market::Btts, Market::Cards, Market::Corners];

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Goals => "goals",
            Market::Btts => "btts",
            Market::Cards => "cards",
            Market::Corners => "corners",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Market::Goals => "Total Goals Over 2.5",
            Market::Btts => "Both Teams To Score",
            Market::Cards => "Total Cards Over 3.5",
            Market::Corners => "Total Corners Over 9.5",
        }
    }

    /// Name of the binary label column in upstream match data
    pub fn label_column(&self) -> &'static str {
        match self {
            Market::Goals => "over_2_5",
            Market::Btts => "btts_yes",
            Market::Cards => "cards_over_3_5",
            Market::Corners => "corners_over_9_5",
        }
    }

    /// Name of the decimal-odds column in upstream match data
    pub fn odds_column(&self) -> &'static str {
        match self {
            Market::Goals => "odds_over25",
            Market::Btts => "odds_btts_yes",
            Market::Cards => "odds_cards_over35",
            Market::Corners => "odds_corners_over95",
        }
    }

    /// Version 1 feature schema: the market's own feature group followed by team form
    pub fn default_schema(&self) -> FeatureSchema {
        let market_features: &[&str] = match self {
            Market::Goals => &[
                "home_goals_avg",
                "away_goals_avg",
                "home_goals_conceded_avg",
                "away_goals_conceded_avg",
                "combined_goals_avg",
                "expected_total_goals",
                "offensive_power",
                "defensive_strength",
            ],
            Market::Btts => &[
                "home_btts_rate",
                "away_btts_rate",
                "combined_btts_rate",
                "both_teams_score_capability",
                "both_teams_concede",
            ],
            Market::Cards => &[
                "home_cards_avg",
                "away_cards_avg",
                "combined_cards_avg",
                "expected_total_cards",
                "high_card_rate",
            ],
            Market::Corners => &[
                "home_corners_avg",
                "away_corners_avg",
                "combined_corners_avg",
                "expected_total_corners",
                "high_corner_rate",
                "corner_dominance",
            ],
        };

        let columns = market_features
            .iter()
            .chain(FORM_FEATURES.iter())
            .map(|c| c.to_string())
            .collect();

        FeatureSchema::new(self.as_str(), 1, columns)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "goals" => Ok(Market::Goals),
            "btts" => Ok(Market::Btts),
            "cards" => Ok(Market::Cards),
            "corners" => Ok(Market::Corners),
            other => Err(PipelineError::InvalidConfig(format!("Unknown market: {}", other))),
        }
    }
}

/// Fixed, versioned list of named feature columns for one market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub id: String,
    pub version: u32,
    pub columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new(id: impl Into<String>, version: u32, columns: Vec<String>) -> Self {
        Self {
            id: id.into(),
            version,
            columns,
        }
    }

    /// Stable identifier, e.g. `goals@v1`
    pub fn identifier(&self) -> String {
        format!("{}@v{}", self.id, self.version)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Exact match required: id, version and column order
    pub fn ensure_matches(&self, other: &FeatureSchema) -> Result<()> {
        if self != other {
            return Err(PipelineError::SchemaMismatch {
                expected: self.identifier(),
                actual: other.identifier(),
            });
        }
        Ok(())
    }
}

/// One labeled match, features laid out in schema order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRow {
    pub match_id: String,
    pub timestamp: DateTime<Utc>,
    pub features: Vec<f64>,
    pub label: bool,
    /// Decimal odds offered for the positive outcome
    pub odds: f64,
}

impl MatchRow {
    pub fn target(&self) -> f64 {
        if self.label {
            1.0
        } else {
            0.0
        }
    }
}

/// Upstream row with features keyed by column name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub timestamp: DateTime<Utc>,
    pub features: HashMap<String, f64>,
    pub label: bool,
    pub odds: f64,
}

/// Validated, schema-bound set of labeled matches for one market
#[derive(Debug, Clone)]
pub struct Dataset {
    market: Market,
    schema: FeatureSchema,
    rows: Vec<MatchRow>,
}

impl Dataset {
    /// Rejects duplicate match ids and rows whose width differs from the schema
    pub fn new(market: Market, schema: FeatureSchema, rows: Vec<MatchRow>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            if !seen.insert(row.match_id.as_str()) {
                return Err(PipelineError::DuplicateMatch(row.match_id.clone()));
            }
            if row.features.len() != schema.len() {
                return Err(PipelineError::SchemaMismatch {
                    expected: format!("{} ({} features)", schema.identifier(), schema.len()),
                    actual: format!("match {} with {} features", row.match_id, row.features.len()),
                });
            }
        }

        Ok(Self { market, schema, rows })
    }

    /// Lays named features out in schema order; missing or unknown names are a schema mismatch
    pub fn from_records(market: Market, schema: FeatureSchema, records: Vec<MatchRecord>) -> Result<Self> {
        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            if record.features.len() != schema.len() {
                return Err(PipelineError::SchemaMismatch {
                    expected: format!("{} ({} features)", schema.identifier(), schema.len()),
                    actual: format!("match {} with {} features", record.match_id, record.features.len()),
                });
            }

            let features = schema
                .columns
                .iter()
                .map(|column| {
                    record.features.get(column).copied().ok_or_else(|| PipelineError::SchemaMismatch {
                        expected: format!("{} column '{}'", schema.identifier(), column),
                        actual: format!("match {} without it", record.match_id),
                    })
                })
                .collect::<Result<Vec<f64>>>()?;

            rows.push(MatchRow {
                match_id: record.match_id,
                timestamp: record.timestamp,
                features,
                label: record.label,
                odds: record.odds,
            });
        }

        Self::new(market, schema, rows)
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[MatchRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in chronological order, ties broken by match id
    pub fn sorted_rows(&self) -> Vec<MatchRow> {
        let mut rows = self.rows.clone();
        sort_chronologically(&mut rows);
        rows
    }

    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.rows.iter().map(|r| r.timestamp).min()?;
        let last = self.rows.iter().map(|r| r.timestamp).max()?;
        Some((first, last))
    }

    /// Number of labeled matches strictly after `cutoff`
    pub fn count_after(&self, cutoff: DateTime<Utc>) -> usize {
        self.rows.iter().filter(|r| r.timestamp > cutoff).count()
    }
}

/// Stable sort by timestamp, then match id for determinism
pub fn sort_chronologically(rows: &mut [MatchRow]) {
    rows.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.match_id.cmp(&b.match_id))
    });
}

/// On-disk dataset format accepted by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub market: Market,
    pub schema: FeatureSchema,
    pub records: Vec<MatchRecord>,
}

impl DatasetFile {
    pub fn into_dataset(self) -> Result<Dataset> {
        Dataset::from_records(self.market, self.schema, self.records)
    }
}

/// Semantic model version `vMAJOR.MINOR.PATCH`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub const INITIAL: ModelVersion = ModelVersion::new(1, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Increments one component and zeroes the lower-order ones
    pub fn bump(&self, kind: BumpKind) -> Result<Self> {
        let bumped = match kind {
            BumpKind::Major => self.major.checked_add(1).map(|major| Self::new(major, 0, 0)),
            BumpKind::Minor => self.minor.checked_add(1).map(|minor| Self::new(self.major, minor, 0)),
            BumpKind::Patch => self
                .patch
                .checked_add(1)
                .map(|patch| Self::new(self.major, self.minor, patch)),
        };
        bumped.ok_or_else(|| PipelineError::InvalidVersion(format!("{} has no {:?} successor", self, kind)))
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ModelVersion {
    type Err = PipelineError;

    /// Only the three-component form is accepted; `v1.2` is rejected
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parts: Vec<&str> = body.split('.').collect();
        if parts.len() != 3 {
            return Err(PipelineError::InvalidVersion(s.to_string()));
        }

        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| PipelineError::InvalidVersion(s.to_string()))
        };

        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

impl TryFrom<String> for ModelVersion {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ModelVersion> for String {
    fn from(version: ModelVersion) -> Self {
        version.to_string()
    }
}

/// Which version component a promotion increments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BumpKind {
    Major,
    Minor,
    Patch,
}

impl FromStr for BumpKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "major" => Ok(BumpKind::Major),
            "minor" => Ok(BumpKind::Minor),
            "patch" => Ok(BumpKind::Patch),
            other => Err(PipelineError::UnknownBumpKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for BumpKind {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BumpKind> for String {
    fn from(kind: BumpKind) -> Self {
        match kind {
            BumpKind::Major => "major",
            BumpKind::Minor => "minor",
            BumpKind::Patch => "patch",
        }
        .to_string()
    }
}

/// Probabilistic classification metrics, always computed together
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub log_loss: f64,
    pub brier_score: f64,
    pub accuracy: f64,
    /// 0.0 when only one class is present
    pub auc_roc: f64,
}

impl EvaluationMetrics {
    pub fn is_finite(&self) -> bool {
        self.log_loss.is_finite()
            && self.brier_score.is_finite()
            && self.accuracy.is_finite()
            && self.auc_roc.is_finite()
    }
}

impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "log_loss={:.4} brier={:.4} accuracy={:.4} auc={:.4}",
            self.log_loss, self.brier_score, self.accuracy, self.auc_roc
        )
    }
}

/// Inclusive time span of the rows a model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
