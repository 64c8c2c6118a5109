use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use matinf_harvest::config::{Config, ConfigLoader};
use matinf_harvest::criteria::CompositionMatch;
use matinf_harvest::error::HarvestError;

#[test]
fn parse_config_with_query_block() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("matinf.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "service_url": "https://matinf.example.org/",
            "api_key": "secret",
            "timeout_secs": 5,
            "output": { "download_dir": "files" },
            "query": {
                "sample_typename": "Sample",
                "associated_typenames": ["Composition", "EDX CSV"],
                "start_date": "2023-01-01",
                "end_date": "2023-06-30",
                "elements": { "Pt": [10, 20], "pd": null, "Ru": { "max": 5 } },
                "composition_match": "all"
            }
        }"#,
    )
    .unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let config: Config = serde_json::from_str(&content).unwrap();
    let resolved = ConfigLoader::resolve_config(config, Some(path), None).unwrap();

    assert_eq!(resolved.service.url, "https://matinf.example.org/");
    assert_eq!(resolved.service.api_key.as_deref(), Some("secret"));
    assert_eq!(resolved.service.timeout, Duration::from_secs(5));
    assert_eq!(resolved.output.download_dir, "files");
    assert_eq!(resolved.output.table_file, "final.csv");

    let request = resolved.query.unwrap().into_request().unwrap();
    assert_eq!(request.query.associated_typenames.len(), 2);
    assert_eq!(request.criteria.len(), 3);
    assert!(request.criteria.has_ranges());
    assert_eq!(request.composition_match, CompositionMatch::All);
    let ranges: Vec<_> = request
        .criteria
        .ranges()
        .map(|(element, range)| (element.to_string(), range.min, range.max))
        .collect();
    assert!(ranges.contains(&("Pt".to_string(), 10.0, 20.0)));
    assert!(ranges.contains(&("Ru".to_string(), 0.0, 5.0)));
}

#[test]
fn presence_list_shape() {
    let config: Config = serde_json::from_str(
        r#"{ "query": {
            "sample_typename": "Sample",
            "associated_typenames": ["Composition"],
            "start_date": "2023-01-01",
            "end_date": "2023-01-01",
            "elements": ["Pt", "Pd"]
        } }"#,
    )
    .unwrap();
    let request = ConfigLoader::resolve_config(config, None, None)
        .unwrap()
        .query
        .unwrap()
        .into_request()
        .unwrap();
    assert_eq!(request.criteria.len(), 2);
    assert!(!request.criteria.has_ranges());
}

#[test]
fn inverted_date_range_is_invalid() {
    let config: Config = serde_json::from_str(
        r#"{ "query": {
            "sample_typename": "Sample",
            "associated_typenames": ["Composition"],
            "start_date": "2024-02-01",
            "end_date": "2024-01-01"
        } }"#,
    )
    .unwrap();
    let query = ConfigLoader::resolve_config(config, None, None).unwrap().query.unwrap();
    assert_matches!(query.into_request(), Err(HarvestError::InvalidCriteria(_)));
}

#[test]
fn explicit_missing_path_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, HarvestError::ConfigRead(_));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("matinf.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, HarvestError::ConfigParse(_));
}
