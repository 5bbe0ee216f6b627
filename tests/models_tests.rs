// Model serialization tests (JSON camelCase, absent sources omitted)

mod common;

use common::*;
use resmon::models::*;

#[test]
fn test_empty_snapshot_has_only_sequence_and_timestamp() {
    let json = serde_json::to_value(Snapshot::empty(3, 1_700_000_000_000)).unwrap();
    let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
    assert_eq!(keys.len(), 2);
    assert_eq!(json["sequence"], 3);
    assert_eq!(json["takenAt"], 1_700_000_000_000u64);
}

#[test]
fn test_absent_source_is_omitted_not_null() {
    let snapshot = Snapshot {
        cpu: Some(cpu_reading()),
        disks: Some(vec![]),
        ..Snapshot::empty(1, 0)
    };
    let text = serde_json::to_string(&snapshot).unwrap();
    assert!(text.contains("\"cpu\""));
    // An empty list is still a reading: sampled, nothing selected was present.
    assert!(text.contains("\"disks\":[]"));
    assert!(!text.contains("memory"));
    assert!(!text.contains("gpus"));
    assert!(!text.contains("null"));
    assert_eq!(
        snapshot.sources_present(),
        vec![SourceKind::Cpu, SourceKind::Disk]
    );
}

#[test]
fn test_readings_serialize_camel_case() {
    let json = serde_json::to_value(cpu_reading()).unwrap();
    assert_eq!(json["usagePercent"], 12.5);
    assert_eq!(json["perCorePercent"], serde_json::json!([10.0, 15.0]));
    assert!(json.get("loadAverage").is_some());

    let json = serde_json::to_value(disk_reading("/")).unwrap();
    assert_eq!(json["totalSpace"], 1000);
    assert_eq!(json["availableSpace"], 750);
}

#[test]
fn test_gpu_temperature_omitted_when_unknown() {
    let mut gpu = gpu_reading(0);
    let json = serde_json::to_value(&gpu).unwrap();
    assert_eq!(json["temperatureC"], 55);
    assert_eq!(json["vramUsagePercent"], 25.0);

    gpu.temperature_c = None;
    let json = serde_json::to_value(&gpu).unwrap();
    assert!(json.get("temperatureC").is_none());
}

#[test]
fn test_source_kind_parsing_and_display() {
    assert_eq!("cpu".parse::<SourceKind>(), Ok(SourceKind::Cpu));
    assert_eq!(" Memory ".parse::<SourceKind>(), Ok(SourceKind::Memory));
    assert_eq!("ram".parse::<SourceKind>(), Ok(SourceKind::Memory));
    assert_eq!("hdd".parse::<SourceKind>(), Ok(SourceKind::Disk));
    assert_eq!("fan".parse::<SourceKind>(), Err("fan".to_string()));
    assert_eq!(SourceKind::Gpu.to_string(), "gpu");
    assert_eq!(
        serde_json::to_string(&SourceKind::Disk).unwrap(),
        "\"disk\""
    );
}

#[test]
fn test_configuration_flattens_settings() {
    let config = Configuration::default();
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["version"], 1);
    assert_eq!(json["intervalMs"], 1000);
    assert!(json.get("settings").is_none());
}

#[test]
fn test_empty_selection_means_all() {
    let mut config = Configuration::default();
    assert!(config.disk_selected("/anything"));
    assert!(config.gpu_selected(7));

    config.settings.selected_disks = vec!["/".into()];
    config.settings.selected_gpu_indices = vec![0];
    assert!(config.disk_selected("/"));
    assert!(!config.disk_selected("/home"));
    assert!(config.gpu_selected(0));
    assert!(!config.gpu_selected(1));
}

#[test]
fn test_settings_interval_clamped() {
    let low = SamplerSettings {
        interval_ms: 1,
        ..SamplerSettings::default()
    }
    .clamped();
    assert_eq!(low.interval_ms, INTERVAL_FLOOR_MS);

    let high = SamplerSettings {
        interval_ms: u64::MAX,
        ..SamplerSettings::default()
    }
    .clamped();
    assert_eq!(high.interval_ms, INTERVAL_CEILING_MS);
}

#[test]
fn test_configuration_update_fields_are_optional() {
    let update: ConfigurationUpdate = serde_json::from_str(r#"{"intervalMs": 250}"#).unwrap();
    assert_eq!(update.interval_ms, Some(250));
    assert!(update.enabled_sources.is_none());
    assert!(!update.persist);

    let update: ConfigurationUpdate =
        serde_json::from_str(r#"{"selectedGpuIndices": [1], "persist": true}"#).unwrap();
    assert_eq!(update.selected_gpu_indices, Some(vec![1]));
    assert!(update.persist);
}

#[test]
fn test_diagnostics_states_lowercase() {
    let d = SubscriberDiagnostics {
        id: 4,
        state: SubscriberState::Draining,
        dropped_frames: 2,
        queued: 1,
    };
    let json = serde_json::to_value(&d).unwrap();
    assert_eq!(json["state"], "draining");
    assert_eq!(json["droppedFrames"], 2);
}
