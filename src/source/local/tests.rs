use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    config::Config,
    coordinator::ConnectionState,
    source::error::TransportError,
    testing::{FakeSensorTransport, RecordingSinks, TransportCall, settle},
};

use super::*;

struct Fixture {
    transport: Arc<FakeSensorTransport>,
    coordinator: Arc<ConnectionCoordinator>,
    source: Arc<LocalSensorSource>,
    _sinks: RecordingSinks,
}

fn fixture(config: Config) -> Fixture {
    let config = Arc::new(config);
    let sinks = RecordingSinks::new();
    let transport = FakeSensorTransport::new(&["dev1", "dev2"]);
    let coordinator = ConnectionCoordinator::new(config.clone(), sinks.sinks());
    let source = Arc::new(LocalSensorSource::new(
        transport.clone(),
        coordinator.clone(),
        config,
    ));

    Fixture {
        transport,
        coordinator,
        source,
        _sinks: sinks,
    }
}

fn count_engine_transitions(coordinator: &ConnectionCoordinator) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    coordinator.add_connection_listener(Arc::new(move |_: ConnectionState| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    count
}

mod measurement_parsing {
    use super::*;

    #[test]
    fn eight_bit_value() {
        assert_eq!(parse_heart_rate_measurement(&[0x00, 72]), Some(72.0));
        assert_eq!(parse_heart_rate_measurement(&[0x16, 64, 0x10, 0x02]), Some(64.0));
    }

    #[test]
    fn sixteen_bit_value() {
        assert_eq!(parse_heart_rate_measurement(&[0x01, 0x2c, 0x01]), Some(300.0));
    }

    #[test]
    fn short_payloads() {
        assert_eq!(parse_heart_rate_measurement(&[]), None);
        assert_eq!(parse_heart_rate_measurement(&[0x00]), None);
        assert_eq!(parse_heart_rate_measurement(&[0x01, 0x2c]), None);
    }

    #[test]
    fn measurement_characteristic_uuid() {
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }
}

mod connect {
    use super::*;

    #[tokio::test]
    async fn forwards_samples_after_connect() {
        let f = fixture(Config::default().with_device_id("dev1"));

        f.source.connect().await.unwrap();

        assert!(f.source.is_connected());
        assert_eq!(f.source.connected_device().as_deref(), Some("dev1"));
        assert!(f.coordinator.state().is_engine_connected());
        assert_eq!(f.transport.subscriber_count(), 1);

        f.transport.emit(SensorEvent::HeartRate(88.0));
        settle().await;

        assert_eq!(f.coordinator.last_sample().map(|s| s.bpm()), Some(88.0));
        assert!(f.coordinator.state().is_gui_connected());
    }

    #[tokio::test]
    async fn requires_a_selected_device() {
        let f = fixture(Config::default());

        let result = f.source.connect().await;

        assert!(matches!(result, Err(SourceError::NoDeviceSelected)));
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn same_device_twice_is_a_no_op() {
        let f = fixture(Config::default());
        let transitions = count_engine_transitions(&f.coordinator);

        f.source.connect_device("dev1").await.unwrap();
        f.source.connect_device("dev1").await.unwrap();

        assert_eq!(f.transport.connect_calls(), 1);
        assert_eq!(f.transport.subscriber_count(), 1);
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_connects_to_one_device_share_the_link() {
        let f = fixture(Config::default());
        let transitions = count_engine_transitions(&f.coordinator);
        let gate = f.transport.hold_connects();

        let (first, second) = tokio::join!(f.source.connect_device("dev1"), async {
            settle().await;
            let second = f.source.connect_device("dev1").await;
            gate.notify_one();
            second
        });
        settle().await;

        first.unwrap();
        second.unwrap();
        assert_eq!(
            f.transport.calls(),
            vec![TransportCall::Connect("dev1".to_string())]
        );
        assert_eq!(f.source.connected_device().as_deref(), Some("dev1"));
        assert_eq!(f.transport.subscriber_count(), 1);
        assert!(f.coordinator.state().is_engine_connected());
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_device_releases_the_current_one_first() {
        let f = fixture(Config::default());

        f.source.connect_device("dev1").await.unwrap();
        f.source.connect_device("dev2").await.unwrap();
        settle().await;

        assert_eq!(
            f.transport.calls(),
            vec![
                TransportCall::Connect("dev1".to_string()),
                TransportCall::Disconnect("dev1".to_string()),
                TransportCall::Connect("dev2".to_string()),
            ]
        );
        assert_eq!(f.transport.subscriber_count(), 1);
        assert_eq!(f.source.connected_device().as_deref(), Some("dev2"));
        assert!(f.coordinator.state().is_engine_connected());
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let f = fixture(Config::default());
        f.transport.set_fail_connect(true);

        let result = f.source.connect_device("dev1").await;

        assert!(matches!(
            result,
            Err(SourceError::Transport(TransportError::Connect { .. }))
        ));
        assert!(!f.source.is_connected());
        assert!(!f.coordinator.state().is_engine_connected());
        assert_eq!(f.transport.subscriber_count(), 0);
    }
}

mod disconnect {
    use super::*;

    #[tokio::test]
    async fn on_fresh_source_is_silent() {
        let f = fixture(Config::default());
        let transitions = count_engine_transitions(&f.coordinator);

        f.source.disconnect().await.unwrap();
        f.source.disconnect().await.unwrap();

        assert!(f.transport.calls().is_empty());
        assert!(!f.coordinator.state().is_engine_connected());
        assert_eq!(transitions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn releases_transport_and_subscription_once() {
        let f = fixture(Config::default());
        let transitions = count_engine_transitions(&f.coordinator);

        f.source.connect_device("dev1").await.unwrap();
        f.source.disconnect().await.unwrap();
        f.source.disconnect().await.unwrap();
        settle().await;

        assert_eq!(
            f.transport.calls(),
            vec![
                TransportCall::Connect("dev1".to_string()),
                TransportCall::Disconnect("dev1".to_string()),
            ]
        );
        assert_eq!(f.transport.subscriber_count(), 0);
        assert!(!f.coordinator.state().is_engine_connected());
        assert_eq!(transitions.load(Ordering::SeqCst), 2);

        // Late notifications go nowhere
        f.transport.emit(SensorEvent::HeartRate(90.0));
        settle().await;
        assert!(f.coordinator.last_sample().is_none());
    }

    #[tokio::test]
    async fn cancels_in_flight_connect() {
        let f = fixture(Config::default());
        let transitions = count_engine_transitions(&f.coordinator);
        let gate = f.transport.hold_connects();

        let connecting = {
            let source = f.source.clone();
            tokio::spawn(async move { source.connect_device("dev1").await })
        };
        settle().await;

        f.source.disconnect().await.unwrap();
        gate.notify_one();

        let result = connecting.await.unwrap();
        settle().await;

        assert!(matches!(result, Err(SourceError::Cancelled)));
        assert!(!f.source.is_connected());
        assert_eq!(f.transport.subscriber_count(), 0);
        assert_eq!(
            f.transport.calls(),
            vec![
                TransportCall::Connect("dev1".to_string()),
                TransportCall::Disconnect("dev1".to_string()),
            ]
        );
        assert!(!f.coordinator.state().is_engine_connected());
        assert_eq!(transitions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn device_loss_drops_the_engine_tier() {
        let f = fixture(Config::default());

        f.source.connect_device("dev1").await.unwrap();
        f.transport.emit(SensorEvent::Disconnected);
        settle().await;

        assert!(!f.source.is_connected());
        assert!(!f.coordinator.state().is_engine_connected());
        assert_eq!(f.transport.subscriber_count(), 0);

        // Nothing left to release
        f.source.disconnect().await.unwrap();
        assert_eq!(
            f.transport.calls(),
            vec![TransportCall::Connect("dev1".to_string())]
        );
    }
}
