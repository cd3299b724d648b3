use super::*;

#[test]
fn defaults() {
    let config = Config::default();

    assert_eq!(config.mode(), SourceType::Local);
    assert_eq!(config.feed_id(), "");
    assert_eq!(config.device_id(), "");
    assert_eq!(config.max_hr(), 200.0);
    assert_eq!(config.sink_addr(), "127.0.0.1:9000");
    assert_eq!(config.level_address(), "/avatar/parameters/hr_percent");
    assert_eq!(config.presence_address(), "/avatar/parameters/hr_connected");
    assert_eq!(config.note_port(), "hroscmidi");
    assert_eq!(config.timeout(), time::Duration::from_secs(10));
    assert_eq!(config.status_interval(), time::Duration::from_secs(10));
    assert!(config.validate().is_ok());
}

#[test]
fn source_type_display_and_toggle() {
    assert_eq!(SourceType::Local.to_string(), "local");
    assert_eq!(SourceType::Remote.to_string(), "remote");
    assert_eq!(SourceType::Local.toggled(), SourceType::Remote);
    assert_eq!(SourceType::Remote.toggled(), SourceType::Local);
}

mod serde_boundary {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "mode": "remote", "timeout": 15 }"#).unwrap();

        assert_eq!(config.mode(), SourceType::Remote);
        assert_eq!(config.timeout(), time::Duration::from_secs(15));
        assert_eq!(config.max_hr(), 200.0);
        assert_eq!(config.note_port(), "hroscmidi");
    }

    #[test]
    fn accepts_legacy_field_and_mode_names() {
        let raw = r#"{
            "mode": "widget",
            "widget_id": "abc123",
            "bluetooth_device": "AA:BB:CC"
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();

        assert_eq!(config.mode(), SourceType::Remote);
        assert_eq!(config.feed_id(), "abc123");
        assert_eq!(config.device_id(), "AA:BB:CC");

        let config: Config = serde_json::from_str(r#"{ "mode": "bluetooth" }"#).unwrap();
        assert_eq!(config.mode(), SourceType::Local);
    }

    #[test]
    fn serialized_form_uses_current_names() {
        let config = Config::default()
            .with_mode(SourceType::Remote)
            .with_feed_id("abc123")
            .with_status_interval(5);

        let value = serde_json::to_value(&config).unwrap();

        assert_eq!(value["mode"], "remote");
        assert_eq!(value["feed_id"], "abc123");
        assert_eq!(value["timeout"], 10);
        assert_eq!(value["status_interval"], 5);

        let restored: Config = serde_json::from_value(value).unwrap();
        assert_eq!(restored, config);
    }
}

mod validation {
    use super::*;

    #[test]
    fn rejects_non_positive_or_non_finite_max_hr() {
        for max_hr in [0.0, -10.0, f32::NAN, f32::INFINITY] {
            let result = Config::default().with_max_hr(max_hr).validate();
            assert!(
                matches!(result, Err(ConfigValidationError::InvalidMaxHr(_))),
                "max_hr {max_hr} should be rejected"
            );
        }
    }

    #[test]
    fn timeout_bounds() {
        assert_eq!(
            Config::default().with_timeout(0).validate(),
            Err(ConfigValidationError::InvalidTimeout)
        );
        assert!(Config::default().with_timeout(1).validate().is_ok());
        assert!(Config::default().with_timeout(600).validate().is_ok());
        assert_eq!(
            Config::default().with_timeout(601).validate(),
            Err(ConfigValidationError::InvalidTimeout)
        );
    }

    #[test]
    fn status_interval_bounds() {
        assert_eq!(
            Config::default().with_status_interval(4).validate(),
            Err(ConfigValidationError::InvalidStatusInterval)
        );
        assert!(Config::default().with_status_interval(5).validate().is_ok());
        assert_eq!(
            Config::default().with_status_interval(11).validate(),
            Err(ConfigValidationError::InvalidStatusInterval)
        );
    }

    #[test]
    fn rejects_zero_sink_port() {
        assert_eq!(
            Config::default().with_sink_port(0).validate(),
            Err(ConfigValidationError::InvalidSinkPort)
        );
    }
}
