//! 集成测试 - GATT 层级、回调派发与设备登记表
//!
//! 用固定的发现结果和一个记录写操作的模拟会话驱动完整流程。

use blegraph_core::ble::{BATTERY_LEVEL_CHAR_UUID, BATTERY_SERVICE_UUID, uuid_from_u16};
use blegraph_core::{
    AttributeHandle, AwaitedPattern, BdAddr, CallableIdentity, CharacteristicProperties,
    CharacteristicRecord, DeviceKey, DeviceRegistry, DiscoveryError, GattError, GattGraph,
    GattSession, Notification, NotificationHandler, NotificationKind, ServiceRecord,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

const SENSOR: BdAddr = BdAddr::new([0xC0, 0xFF, 0xEE, 0x00, 0x11, 0x22]);

/// 记录所有描述符写入的模拟连接
struct RecordingSession {
    peer: DeviceKey,
    writes: Mutex<Vec<(AttributeHandle, Vec<u8>)>>,
}

impl RecordingSession {
    fn new(peer: DeviceKey) -> Arc<Self> {
        Arc::new(Self {
            peer,
            writes: Mutex::new(Vec::new()),
        })
    }

    fn writes(&self) -> Vec<(AttributeHandle, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GattSession for RecordingSession {
    fn peer(&self) -> DeviceKey {
        self.peer
    }

    async fn write_descriptor(&self, handle: AttributeHandle, value: &[u8]) -> Result<(), GattError> {
        self.writes.lock().unwrap().push((handle, value.to_vec()));
        Ok(())
    }
}

/// GAP + 电池服务 + 一个厂商服务
///
/// ```text
/// 0x0001..=0x0005 GAP (0x1800)
///   0x0002/0x0003 device name (read)
/// 0x0010..=0x0014 battery (0x180F)
///   0x0011/0x0012 battery level (read|notify), CCCD 0x0013
/// 0x0020..=0x0028 vendor
///   0x0021/0x0022 tx (indicate), CCCD 0x0023
///   0x0025/0x0026 rx (write)
/// ```
fn discovery() -> Vec<ServiceRecord> {
    let vendor: blegraph_core::AttributeUuid =
        "6e400001-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap();
    let tx: blegraph_core::AttributeUuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap();
    let rx: blegraph_core::AttributeUuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap();

    vec![
        ServiceRecord::primary(0x0001, 0x0005, 0x1800u16).with_characteristic(
            CharacteristicRecord::new(0x0002, 0x0003, 0x2A00u16, CharacteristicProperties::READ),
        ),
        ServiceRecord::primary(0x0010, 0x0014, 0x180Fu16).with_characteristic(
            CharacteristicRecord::new(
                0x0011,
                0x0012,
                0x2A19u16,
                CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
            )
            .with_descriptor(0x0013, 0x2902u16),
        ),
        ServiceRecord::primary(0x0020, 0x0028, vendor)
            .with_characteristic(
                CharacteristicRecord::new(0x0021, 0x0022, tx, CharacteristicProperties::INDICATE)
                    .with_descriptor(0x0023, 0x2902u16),
            )
            .with_characteristic(CharacteristicRecord::new(
                0x0025,
                0x0026,
                rx,
                CharacteristicProperties::WRITE_WITH_ACK,
            )),
    ]
}

fn assemble(session: &Arc<RecordingSession>) -> GattGraph {
    let dyn_session: Arc<dyn GattSession> = session.clone();
    GattGraph::assemble(
        DeviceKey::random(SENSOR),
        &discovery(),
        Arc::downgrade(&dyn_session),
    )
    .unwrap()
}

static BATTERY_HITS: AtomicUsize = AtomicUsize::new(0);

fn on_battery(_: &Notification) {
    BATTERY_HITS.fetch_add(1, Ordering::SeqCst);
}

/// 计数器，按实例身份订阅
#[derive(Default)]
struct Counter {
    seen: Mutex<Vec<Vec<u8>>>,
}

impl Counter {
    fn on_notification(&self, n: &Notification) {
        self.seen.lock().unwrap().push(n.value.clone());
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[test]
fn test_discovery_round_trip() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);

    assert_eq!(graph.service_count(), 3);
    assert_eq!(graph.characteristic_count(), 4);

    let battery = graph.find_service_by_uuid(BATTERY_SERVICE_UUID).unwrap();
    assert_eq!(battery.range().start(), AttributeHandle(0x0010));
    assert_eq!(battery.range().end(), AttributeHandle(0x0014));

    let level = battery.find_characteristic(BATTERY_LEVEL_CHAR_UUID).unwrap();
    assert_eq!(level.handle(), AttributeHandle(0x0011));
    assert_eq!(level.value_handle(), AttributeHandle(0x0012));
    // 最后一个特征延伸到服务结尾
    assert_eq!(level.end_handle(), AttributeHandle(0x0014));
    assert!(level.properties().contains(CharacteristicProperties::NOTIFY));
    assert_eq!(level.client_config().unwrap().handle, AttributeHandle(0x0013));

    // 未出现在发现结果中的 UUID
    assert!(graph.find_service_by_uuid(0x1801u16).is_none());
    assert!(battery.find_characteristic(0x2A00u16).is_none());
}

#[test]
fn test_graph_mirrors_discovery_records() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);
    let records = discovery();

    assert_eq!(graph.services().len(), records.len());
    for (service, record) in graph.services().iter().zip(&records) {
        assert_eq!(
            (
                service.is_primary(),
                service.range().start().value(),
                service.range().end().value(),
                service.uuid(),
            ),
            (
                record.is_primary,
                record.start_handle,
                record.end_handle,
                record.uuid.to_uuid(),
            )
        );

        assert_eq!(service.characteristics().len(), record.characteristics.len());
        for (characteristic, expected) in service.characteristics().iter().zip(&record.characteristics) {
            assert_eq!(characteristic.handle().value(), expected.handle);
            assert_eq!(characteristic.value_handle().value(), expected.value_handle);
            assert_eq!(characteristic.uuid(), expected.uuid.to_uuid());
            assert_eq!(characteristic.properties().bits(), expected.properties);

            let descriptors: Vec<_> = characteristic
                .descriptors()
                .iter()
                .map(|d| (d.handle.value(), d.uuid))
                .collect();
            let expected_descriptors: Vec<_> = expected
                .descriptors
                .iter()
                .map(|d| (d.handle, d.uuid.to_uuid()))
                .collect();
            assert_eq!(descriptors, expected_descriptors);
        }
    }

    let flattened: Vec<_> = graph.characteristics().map(|c| c.value_handle().value()).collect();
    assert_eq!(flattened, vec![0x0003, 0x0012, 0x0022, 0x0026]);
}

#[test]
fn test_identity_ignores_uuid_and_contents() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);

    // 相同区间，不同 UUID、不同特征
    let dyn_session: Arc<dyn GattSession> = session.clone();
    let reshaped = GattGraph::assemble(
        DeviceKey::random(SENSOR),
        &[
            ServiceRecord::primary(0x0010, 0x0014, 0x181Au16).with_characteristic(
                CharacteristicRecord::new(0x0011, 0x0012, 0x2A6Eu16, CharacteristicProperties::READ),
            ),
            ServiceRecord::primary(0x0020, 0x0028, 0x1809u16)
                .with_characteristic(CharacteristicRecord::new(
                    0x0021,
                    0x0022,
                    0x2A1Cu16,
                    CharacteristicProperties::WRITE_NO_ACK,
                ))
                .with_characteristic(CharacteristicRecord::new(
                    0x0024,
                    0x0025,
                    0x2A1Du16,
                    CharacteristicProperties::READ,
                )),
        ],
        Arc::downgrade(&dyn_session),
    )
    .unwrap();

    let battery = graph.find_service_by_uuid(BATTERY_SERVICE_UUID).unwrap();
    let environmental = &reshaped.services()[0];
    assert_ne!(environmental.uuid(), battery.uuid());
    assert_eq!(**environmental, **battery);

    let level = battery.find_characteristic(BATTERY_LEVEL_CHAR_UUID).unwrap();
    let temperature = &environmental.characteristics()[0];
    assert_ne!(temperature.uuid(), level.uuid());
    assert_eq!(temperature.range(), level.range());
    assert_eq!(**temperature, **level);

    // 厂商服务区间相同但特征数量不同
    let vendor = &graph.services()[2];
    let thermometer = &reshaped.services()[1];
    assert_ne!(vendor.characteristics().len(), thermometer.characteristics().len());
    assert_eq!(**thermometer, **vendor);
    // 区间不同的特征不相等
    assert_ne!(*thermometer.characteristics()[0], *vendor.characteristics()[0]);
}

#[test]
fn test_vendor_characteristic_ranges() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);

    let vendor = &graph.services()[2];
    let chars = vendor.characteristics();
    assert_eq!(chars.len(), 2);
    // tx 延伸到 rx 声明之前
    assert_eq!(chars[0].end_handle(), AttributeHandle(0x0024));
    assert_eq!(chars[1].end_handle(), AttributeHandle(0x0028));
}

#[test]
fn test_handle_identity_across_snapshots() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let first = assemble(&session);
    let second = assemble(&session);

    let old_service = first.find_service_by_uuid(0x180Fu16).unwrap();
    let old_level = old_service.find_characteristic(0x2A19u16).unwrap();

    let service = second.find_service_by_identity(old_service).unwrap();
    assert_eq!(**service, **old_service);
    assert!(!Arc::ptr_eq(service, old_service));

    let level = second
        .find_characteristic_by_identity(old_service, old_level)
        .unwrap();
    assert_eq!(level.value_handle(), old_level.value_handle());
    assert_eq!(
        second.find_characteristic_by_uuid(old_service, 0x2A19u16).unwrap().range(),
        old_level.range()
    );
}

#[test]
fn test_malformed_discovery_is_rejected() {
    let overlapping = vec![
        ServiceRecord::primary(0x0001, 0x0010, 0x1800u16),
        ServiceRecord::primary(0x0008, 0x0020, 0x180Fu16),
    ];
    let result = GattGraph::assemble(
        DeviceKey::public(SENSOR),
        &overlapping,
        Weak::<RecordingSession>::new(),
    );
    assert!(matches!(
        result,
        Err(DiscoveryError::OverlappingServices { .. })
    ));

    let reserved = vec![ServiceRecord::primary(0x0000, 0x0005, 0x1800u16)];
    let result = GattGraph::assemble(
        DeviceKey::public(SENSOR),
        &reserved,
        Weak::<RecordingSession>::new(),
    );
    assert_eq!(
        result.unwrap_err(),
        DiscoveryError::InvalidServiceRange { start: 0, end: 5 }
    );
}

#[test]
fn test_subscribe_deliver_unsubscribe() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);
    let level = graph.find_characteristic_by_value_handle(AttributeHandle(0x0012)).unwrap();

    let counter = Arc::new(Counter::default());
    let by_member: NotificationHandler =
        CallableIdentity::member(Arc::clone(&counter), Counter::on_notification);
    let by_plain: NotificationHandler = CallableIdentity::plain(on_battery);

    assert!(level.subscribe(by_member.clone()));
    assert!(level.subscribe(by_plain.clone()));
    // 同一身份只登记一次
    assert!(!level.subscribe(CallableIdentity::member(
        Arc::clone(&counter),
        Counter::on_notification
    )));
    assert_eq!(level.subscriber_count(), 2);

    let before = BATTERY_HITS.load(Ordering::SeqCst);
    let invoked = graph.deliver(AttributeHandle(0x0012), &[87], NotificationKind::Notification);
    assert_eq!(invoked, Some(2));
    assert_eq!(counter.count(), 1);
    assert!(BATTERY_HITS.load(Ordering::SeqCst) > before);
    assert_eq!(level.value(), vec![87]);

    // 用重新构造的等价处理函数移除
    assert!(level.unsubscribe(&CallableIdentity::member(
        Arc::clone(&counter),
        Counter::on_notification
    )));
    assert!(!level.is_subscribed(&by_member));
    assert!(level.is_subscribed(&by_plain));

    graph.deliver(AttributeHandle(0x0012), &[86], NotificationKind::Notification);
    assert_eq!(counter.count(), 1);
    assert_eq!(level.value(), vec![86]);
}

#[test]
fn test_unknown_handle_is_dropped() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);
    assert_eq!(
        graph.deliver(AttributeHandle(0x0099), &[1], NotificationKind::Notification),
        None
    );
}

#[test]
fn test_graph_listeners_see_every_characteristic() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);

    let log = Arc::new(Mutex::new(Vec::new()));
    let listener: NotificationHandler = CallableIdentity::captured(
        Arc::clone(&log),
        |log: &Arc<Mutex<Vec<(u16, NotificationKind)>>>, n: &Notification| {
            log.lock().unwrap().push((n.value_handle.value(), n.kind));
        },
    );
    assert!(graph.add_listener(listener.clone()));
    assert_eq!(graph.listener_count(), 1);

    graph.deliver(AttributeHandle(0x0012), &[50], NotificationKind::Notification);
    graph.deliver(AttributeHandle(0x0022), b"hello", NotificationKind::Indication);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            (0x0012, NotificationKind::Notification),
            (0x0022, NotificationKind::Indication)
        ]
    );

    assert!(graph.remove_listener(&listener));
    graph.deliver(AttributeHandle(0x0012), &[49], NotificationKind::Notification);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn test_handler_removes_itself_during_dispatch() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = Arc::new(assemble(&session));

    let hits = Arc::new(AtomicUsize::new(0));
    let weak_graph = Arc::downgrade(&graph);
    let hits_in = Arc::clone(&hits);
    let handler: NotificationHandler = CallableIdentity::opaque(7, move |_: &Notification| {
        hits_in.fetch_add(1, Ordering::SeqCst);
        if let Some(graph) = weak_graph.upgrade() {
            let me: NotificationHandler = CallableIdentity::opaque(7, |_: &Notification| {});
            graph
                .find_characteristic_by_value_handle(AttributeHandle(0x0012))
                .unwrap()
                .unsubscribe(&me);
        }
    });

    let level = graph.find_characteristic_by_value_handle(AttributeHandle(0x0012)).unwrap();
    level.subscribe(handler);

    graph.deliver(AttributeHandle(0x0012), &[1], NotificationKind::Notification);
    graph.deliver(AttributeHandle(0x0012), &[2], NotificationKind::Notification);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(level.subscriber_count(), 0);
}

#[tokio::test]
async fn test_configure_notifications_writes_cccd() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);

    let level = graph.find_characteristic_by_value_handle(AttributeHandle(0x0012)).unwrap();
    graph.configure_notifications(level, true, false).await.unwrap();

    let tx = graph.find_characteristic_by_value_handle(AttributeHandle(0x0022)).unwrap();
    graph.configure_notifications(tx, false, true).await.unwrap();
    graph.configure_notifications(tx, false, false).await.unwrap();

    assert_eq!(
        session.writes(),
        vec![
            (AttributeHandle(0x0013), vec![0x01, 0x00]),
            (AttributeHandle(0x0023), vec![0x02, 0x00]),
            (AttributeHandle(0x0023), vec![0x00, 0x00]),
        ]
    );
}

#[tokio::test]
async fn test_configure_notifications_rejects_unsupported() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);

    // 电池电量只支持 notify
    let level = graph.find_characteristic_by_value_handle(AttributeHandle(0x0012)).unwrap();
    let err = graph.configure_notifications(level, false, true).await.unwrap_err();
    assert!(matches!(err, GattError::NotSupported { operation: "indicate", .. }));

    // 设备名称既不能 notify 也没有 CCCD
    let name = graph.find_characteristic_by_value_handle(AttributeHandle(0x0003)).unwrap();
    let err = graph.configure_notifications(name, true, false).await.unwrap_err();
    assert!(matches!(err, GattError::NotSupported { .. }));

    assert!(session.writes().is_empty());
}

#[tokio::test]
async fn test_handler_gone_after_session_drop() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);
    assert_eq!(
        graph.resolve_owning_session().unwrap().peer(),
        DeviceKey::random(SENSOR)
    );

    drop(session);

    let battery = graph.find_service_by_uuid(0x180Fu16).unwrap();
    assert!(matches!(
        battery.resolve_owning_session(),
        Err(GattError::HandlerGone)
    ));

    let level = battery.find_characteristic(0x2A19u16).unwrap();
    let err = graph.configure_notifications(level, true, false).await.unwrap_err();
    assert!(matches!(err, GattError::HandlerGone));
}

#[test]
fn test_describe_lists_hierarchy() {
    let session = RecordingSession::new(DeviceKey::random(SENSOR));
    let graph = assemble(&session);
    let text = graph.describe();

    assert!(text.starts_with("device C0:FF:EE:00:11:22/random"));
    assert!(text.contains(&uuid_from_u16(0x180F).to_string()));
    assert!(text.contains("desc 0x0013"));
    assert_eq!(text.lines().count(), 1 + 3 + 4 + 2);
}

#[test]
fn test_registry_awaited_to_completion() {
    let registry = Arc::new(DeviceRegistry::default());
    let sensor = DeviceKey::random(SENSOR);
    let beacon = DeviceKey::public(BdAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
    let stranger = DeviceKey::public(BdAddr::new([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB]));

    // 没有任何带地址的模式时完成条件为真
    assert!(registry.all_awaited_are_processed());

    registry.add_awaited(AwaitedPattern::by_key(sensor));
    registry.add_awaited(AwaitedPattern::by_name("Beacon").unwrap());
    assert!(!registry.all_awaited_are_processed());

    assert!(registry.is_awaited(&sensor, ""));
    assert!(registry.is_awaited(&beacon, "Beacon-7"));
    assert!(!registry.is_awaited(&stranger, "beacon"));
    // 同一地址换一种地址类型就是另一台设备
    assert!(!registry.is_awaited(&DeviceKey::public(SENSOR), ""));

    assert!(registry.mark_processing(sensor, "Thermo"));
    assert!(registry.is_processing(&sensor));
    assert!(registry.unmark_processing(&sensor));
    assert!(!registry.unmark_processing(&sensor));

    // 失败后重新进入处理中
    assert!(registry.mark_processing(sensor, "Thermo"));
    assert!(registry.mark_processed(sensor, "Thermo"));
    registry.unmark_processing(&sensor);
    assert!(!registry.mark_processed(sensor, "Thermo"));

    // 名称模式不计入完成条件
    assert!(registry.all_awaited_are_processed());
    assert_eq!(registry.processed_count(), 1);

    registry.shutdown();
    assert_eq!(registry.awaited_count(), 0);
    assert_eq!(registry.processed_count(), 0);
}

#[test]
fn test_registry_shared_across_threads() {
    let registry = Arc::new(DeviceRegistry::default());
    let keys: Vec<DeviceKey> = (0..8u8)
        .map(|i| DeviceKey::public(BdAddr::new([0, 0, 0, 0, 0, i])))
        .collect();
    for key in &keys {
        registry.add_awaited(AwaitedPattern::by_key(*key));
    }

    let handles: Vec<_> = keys
        .iter()
        .map(|key| {
            let registry = Arc::clone(&registry);
            let key = *key;
            std::thread::spawn(move || {
                registry.mark_processing(key, "worker");
                registry.mark_processed(key, "worker");
                registry.unmark_processing(&key);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.processing_count(), 0);
    assert_eq!(registry.processed_count(), keys.len());
    assert!(registry.all_awaited_are_processed());
}
