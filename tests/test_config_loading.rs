//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use mqtt_chat::config::{ChatConfig, ConfigError, MqttSection, SessionConfig};
use mqtt_chat::protocol::TopicError;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[session]
host = "10.0.0.5"
port = 1883
topic = "room/1"

[mqtt]
client_id_prefix = "laptop"
publish_timeout_ms = 2500
"#,
    );

    let config = ChatConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.session, SessionConfig::new("10.0.0.5", 1883, "room/1"));
    assert_eq!(config.mqtt.client_id_prefix, "laptop");
    assert_eq!(config.mqtt.publish_timeout(), Duration::from_millis(2500));
    assert_eq!(config.mqtt.connect_timeout(), Duration::from_millis(5000));
}

#[test]
fn test_mqtt_section_is_optional() {
    let temp_file = write_config(
        r#"
[session]
host = "broker.local"
port = 8883
topic = "chat/alice-bob"
"#,
    );

    let config = ChatConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.mqtt, MqttSection::default());
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = ChatConfig::load_from_file(std::path::Path::new("/nonexistent/chat.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[session\nhost = ");
    let result = ChatConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_topic_is_a_parse_error() {
    let temp_file = write_config(
        r#"
[session]
host = "10.0.0.5"
port = 1883
"#,
    );
    let result = ChatConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_fail_validation_on_load() {
    let cases = [
        (
            r#"
[session]
host = "10.0.0.5"
port = 0
topic = "room/1"
"#,
            "port",
        ),
        (
            r#"
[session]
host = "10.0.0.5"
port = 1883
topic = ""
"#,
            "topic",
        ),
        (
            r#"
[session]
host = "10.0.0.5"
port = 1883
topic = "room/+"
"#,
            "wildcard",
        ),
        (
            r#"
[session]
host = "10.0.0.5"
port = 1883
topic = "room/1"

[mqtt]
publish_timeout_ms = 0
"#,
            "timeout",
        ),
    ];

    for (content, label) in cases {
        let temp_file = write_config(content);
        assert!(
            ChatConfig::load_from_file(temp_file.path()).is_err(),
            "{label} case should fail"
        );
    }
}

#[test]
fn test_wildcard_topic_error_names_the_character() {
    let result = SessionConfig::new("10.0.0.5", 1883, "room/#").validate();
    assert!(matches!(
        result,
        Err(ConfigError::InvalidTopic(TopicError::WildcardInTopicName('#')))
    ));
}

#[test]
fn test_broker_url_form() {
    let config = SessionConfig::from_broker_url("mqtt://10.0.0.5", "room/1").unwrap();
    assert_eq!(config, SessionConfig::new("10.0.0.5", 1883, "room/1"));

    assert!(matches!(
        SessionConfig::from_broker_url("http://10.0.0.5", "room/1"),
        Err(ConfigError::InvalidBrokerUrl(_))
    ));
    assert!(matches!(
        SessionConfig::from_broker_url("not a url", "room/1"),
        Err(ConfigError::InvalidBrokerUrl(_))
    ));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = ChatConfig {
        session: SessionConfig::new("10.0.0.5", 1883, "room/1"),
        mqtt: MqttSection::default(),
    };

    let rendered = toml::to_string_pretty(&config).unwrap();
    let parsed: ChatConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed, config);
}
