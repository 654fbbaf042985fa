//! Tests for core types

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use crate::error::PipelineError;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn row(id: &str, hours: i64, width: usize) -> MatchRow {
        MatchRow {
            match_id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours),
            features: vec![1.0; width],
            label: hours % 2 == 0,
            odds: 1.9,
        }
    }

    #[test]
    fn test_market_serialization() {
        assert_eq!(serde_json::to_string(&Market::Btts).unwrap(), "\"btts\"");
        let corners: Market = serde_json::from_str("\"corners\"").unwrap();
        assert_eq!(corners, Market::Corners);
        assert_eq!("GOALS".parse::<Market>().unwrap(), Market::Goals);
        assert!("handicap".parse::<Market>().is_err());
    }

    #[test]
    fn test_default_schemas() {
        let goals = Market::Goals.default_schema();
        assert_eq!(goals.identifier(), "goals@v1");
        assert_eq!(goals.len(), 12);
        assert_eq!(goals.columns.last().map(String::as_str), Some("combined_form_score"));
        assert_eq!(Market::Btts.default_schema().len(), 9);
    }

    #[test]
    fn test_schema_mismatch_on_version() {
        let v1 = Market::Cards.default_schema();
        let mut v2 = v1.clone();
        v2.version = 2;
        assert!(v1.ensure_matches(&v1.clone()).is_ok());
        assert!(matches!(v1.ensure_matches(&v2), Err(PipelineError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_model_version_parse_and_display() {
        let version: ModelVersion = "v1.2.3".parse().unwrap();
        assert_eq!(version, ModelVersion::new(1, 2, 3));
        assert_eq!(version.to_string(), "v1.2.3");
        assert_eq!("2.0.0".parse::<ModelVersion>().unwrap(), ModelVersion::new(2, 0, 0));
        assert!("v1.2".parse::<ModelVersion>().is_err());
        assert!("v1.x.0".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn test_model_version_bump_and_order() {
        let version = ModelVersion::new(1, 4, 2);
        assert_eq!(version.bump(BumpKind::Major).unwrap(), ModelVersion::new(2, 0, 0));
        assert_eq!(version.bump(BumpKind::Minor).unwrap(), ModelVersion::new(1, 5, 0));
        assert_eq!(version.bump(BumpKind::Patch).unwrap(), ModelVersion::new(1, 4, 3));
        assert!(ModelVersion::new(1, 10, 0) > ModelVersion::new(1, 9, 9));
    }

    #[test]
    fn test_model_version_bump_overflow() {
        let top = ModelVersion::new(u32::MAX, u32::MAX, u32::MAX);
        for kind in [BumpKind::Major, BumpKind::Minor, BumpKind::Patch] {
            assert!(matches!(top.bump(kind), Err(PipelineError::InvalidVersion(_))));
        }
        assert_eq!(
            ModelVersion::new(1, u32::MAX, 7).bump(BumpKind::Major).unwrap(),
            ModelVersion::new(2, 0, 0)
        );
    }

    #[test]
    fn test_model_version_serde_as_string() {
        let json = serde_json::to_string(&ModelVersion::INITIAL).unwrap();
        assert_eq!(json, "\"v1.0.0\"");
        assert!(serde_json::from_str::<ModelVersion>("\"v1\"").is_err());
    }

    #[test]
    fn test_dataset_rejects_duplicate_match_ids() {
        let schema = Market::Goals.default_schema();
        let rows = vec![row("a", 0, schema.len()), row("a", 1, schema.len())];
        assert!(matches!(
            Dataset::new(Market::Goals, schema, rows),
            Err(PipelineError::DuplicateMatch(id)) if id == "a"
        ));
    }

    #[test]
    fn test_dataset_rejects_wrong_width() {
        let schema = Market::Goals.default_schema();
        let rows = vec![row("a", 0, schema.len() - 1)];
        assert!(matches!(
            Dataset::new(Market::Goals, schema, rows),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_from_records_orders_features_by_schema() {
        let schema = FeatureSchema::new("tiny", 1, vec!["a".to_string(), "b".to_string()]);
        let record = MatchRecord {
            match_id: "m1".to_string(),
            timestamp: Utc::now(),
            features: HashMap::from([("b".to_string(), 2.0), ("a".to_string(), 1.0)]),
            label: true,
            odds: 2.1,
        };

        let dataset = Dataset::from_records(Market::Btts, schema.clone(), vec![record.clone()]).unwrap();
        assert_eq!(dataset.rows()[0].features, vec![1.0, 2.0]);

        let mut unknown = record;
        unknown.features = HashMap::from([("a".to_string(), 1.0), ("c".to_string(), 3.0)]);
        assert!(matches!(
            Dataset::from_records(Market::Btts, schema, vec![unknown]),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_sorted_rows_and_count_after() {
        let schema = FeatureSchema::new("tiny", 1, vec!["a".to_string()]);
        let rows = vec![row("c", 5, 1), row("b", 1, 1), row("a", 1, 1)];
        let dataset = Dataset::new(Market::Goals, schema, rows).unwrap();

        let ids: Vec<String> = dataset.sorted_rows().into_iter().map(|r| r.match_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let (first, last) = dataset.time_range().unwrap();
        assert_eq!(last - first, Duration::hours(4));
        assert_eq!(dataset.count_after(first), 1);
    }
}
