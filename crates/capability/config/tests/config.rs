use domain::TransportKind;
use relay_config::{
    BrokerConfig, ConfigError, config_path_from_args, load_equipment_config, load_recorder_config,
    parse_equipment_config,
};
use std::io::Write;

fn write_temp(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(text.as_bytes()).expect("write");
    file
}

#[test]
fn load_broker_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("RELAY_MQTT_HOST", "broker.local");
        std::env::set_var("RELAY_MQTT_PORT", "1884");
        std::env::set_var("RELAY_MQTT_USERNAME", "relay");
    }

    let config = BrokerConfig::from_env().expect("config");
    assert_eq!(config.host, "broker.local");
    assert_eq!(config.port, 1884);
    assert_eq!(config.username.as_deref(), Some("relay"));
    assert_eq!(config.keep_alive_seconds, 30);
}

#[test]
fn first_argument_wins_over_env() {
    let path = config_path_from_args(vec!["/etc/relay/psu.json".to_string()].into_iter())
        .expect("path");
    assert_eq!(path.to_str(), Some("/etc/relay/psu.json"));
}

#[test]
fn load_equipment_config_from_file() {
    let file = write_temp(
        r#"{
            "EquipmentTags": {
                "EquipmentName": "PSU-01",
                "Communication": "ModbusTcp",
                "Connection": { "IP": "10.0.0.5", "Unit": 1 },
                "PortNum": 502
            },
            "Channels": {
                "PT-101": { "Type": "HRegister", "IOPoint": 10, "DataType": "int16",
                            "Scalar": 0.1, "Offset": 0, "Decimal": 1 },
                "RUN": { "Type": "Coils", "IOPoint": 3, "DataType": "bool" }
            }
        }"#,
    );
    let config = load_equipment_config(file.path()).expect("config");
    assert_eq!(config.transport(), TransportKind::ModbusTcp);
    assert_eq!(config.channels.len(), 2);
}

#[test]
fn scaled_channel_without_scalar_is_rejected() {
    let err = parse_equipment_config(
        r#"{
            "EquipmentTags": {
                "EquipmentName": "PSU-01",
                "Communication": "ModbusTcp",
                "Connection": { "IP": "10.0.0.5" }
            },
            "Channels": {
                "PT-101": { "Type": "HRegister", "IOPoint": 10, "DataType": "float32",
                            "Offset": 0, "Decimal": 1 }
            }
        }"#,
    )
    .expect_err("missing scalar");
    assert!(matches!(err, ConfigError::Channel { ref tagnum, .. } if tagnum == "PT-101"));
}

#[test]
fn ping_channels_skip_scaling_fields() {
    let config = parse_equipment_config(
        r#"{
            "EquipmentTags": { "EquipmentName": "GW", "Communication": "Ping", "TargetIP": "10.0.0.1" },
            "Channels": { "STALE": { "DataType": "NR1" } }
        }"#,
    )
    .expect("config");
    assert_eq!(config.transport(), TransportKind::Ping);
}

#[test]
fn scpi_channels_skip_scaling_fields() {
    let config = parse_equipment_config(
        r#"{
            "EquipmentTags": { "EquipmentName": "PSU", "Communication": "SCPI",
                               "VISA_address": "TCPIP::10.0.0.7::INSTR" },
            "Channels": { "VOLT": { "IOPoint": "VOLT", "DataType": "NR2", "RequestText": "MEAS:" } }
        }"#,
    )
    .expect("config");
    assert_eq!(config.transport(), TransportKind::Scpi);
    assert!(config.channel("VOLT").is_some());
}

#[test]
fn missing_transport_parameter_is_rejected() {
    let err = parse_equipment_config(
        r#"{ "EquipmentTags": { "EquipmentName": "DMM", "Communication": "SCPI" } }"#,
    )
    .expect_err("missing visa address");
    assert!(err.to_string().contains("VISA_address"));
}

#[test]
fn unknown_communication_fails_at_load() {
    let err = parse_equipment_config(
        r#"{ "EquipmentTags": { "EquipmentName": "X", "Communication": "Telegraph" } }"#,
    )
    .expect_err("unknown");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn load_recorder_config_from_file() {
    let file = write_temp(
        r#"{
            "DatabaseTags": { "DatabaseName": "Recorder" },
            "DatabaseDetails": { "Server": "postgres://relay@localhost/relay", "DefaultTable": "readings" }
        }"#,
    );
    let config = load_recorder_config(file.path()).expect("config");
    assert_eq!(config.database_name, "Recorder");
    assert_eq!(config.default_table, "readings");
    assert_eq!(config.max_pending_rows, 100_000);
}

#[test]
fn missing_file_reports_io_error() {
    let err = load_recorder_config(std::path::Path::new("/nonexistent/relay.json"))
        .expect_err("missing");
    assert!(matches!(err, ConfigError::Io(..)));
}
