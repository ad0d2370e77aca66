//! BlueZ 适配 (bluer)
//!
//! 把 BlueZ D-Bus 对象树转换为 [`ServiceRecord`]，并以 [`BluezSession`]
//! 作为 GATT 图的连接上下文。
//!
//! # 句柄
//!
//! BlueZ 对象路径中编码了 ATT 句柄（`service000c/char000d/desc000f`），
//! `bluer` 通过 `id()` 暴露出来：
//! - 服务 id = 服务声明句柄
//! - 特征 id = 特征声明句柄，值句柄为 id + 1
//! - 描述符 id = 描述符句柄
//!
//! D-Bus 不提供服务结束句柄，这里取服务内出现的最大句柄。
//!
//! # CCCD
//!
//! BlueZ 自己管理 CCCD，不允许客户端直接写入。对 0x2902 的写被翻译为
//! 开启/关闭 BlueZ 通知流，流中的数据经 [`GattGraph::deliver`] 派发。

use log::{debug, info, trace, warn};

use crate::ble::{AddressType, BdAddr, CLIENT_CHARACTERISTIC_CONFIGURATION, DeviceKey};
use crate::gatt::{
    AttributeHandle, CharacteristicProperties, CharacteristicRecord, DiscoveryError, GattError,
    GattGraph, GattSession, NotificationKind, ServiceRecord,
};
use crate::registry::DeviceRegistry;
use async_trait::async_trait;
use bluer::AdapterEvent;
use bluer::gatt::CharacteristicFlags;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// 等待 BlueZ 完成服务解析的上限
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum BluezError {
    #[error("BlueZ error: {0}")]
    Bluer(#[from] bluer::Error),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Timed out waiting for {0} to resolve services")]
    ResolveTimeout(DeviceKey),

    #[error("Device {0} is not known to the adapter")]
    UnknownDevice(DeviceKey),
}

impl From<bluer::Address> for BdAddr {
    fn from(addr: bluer::Address) -> Self {
        BdAddr::new(addr.0)
    }
}

impl From<BdAddr> for bluer::Address {
    fn from(addr: BdAddr) -> Self {
        bluer::Address::new(*addr.as_bytes())
    }
}

impl From<bluer::AddressType> for AddressType {
    fn from(addr_type: bluer::AddressType) -> Self {
        match addr_type {
            bluer::AddressType::LePublic => AddressType::Public,
            bluer::AddressType::LeRandom => AddressType::Random,
            bluer::AddressType::BrEdr => AddressType::BrEdr,
        }
    }
}

fn properties_from_flags(flags: &CharacteristicFlags) -> CharacteristicProperties {
    let mut props = CharacteristicProperties::empty();
    props.set(CharacteristicProperties::BROADCAST, flags.broadcast);
    props.set(CharacteristicProperties::READ, flags.read);
    props.set(
        CharacteristicProperties::WRITE_NO_ACK,
        flags.write_without_response,
    );
    props.set(CharacteristicProperties::WRITE_WITH_ACK, flags.write);
    props.set(CharacteristicProperties::NOTIFY, flags.notify);
    props.set(CharacteristicProperties::INDICATE, flags.indicate);
    props.set(
        CharacteristicProperties::AUTH_SIGNED_WRITE,
        flags.authenticated_signed_writes,
    );
    props.set(
        CharacteristicProperties::EXT_PROPS,
        flags.extended_properties,
    );
    props
}

/// 描述符在 BlueZ 对象树中的位置
#[derive(Debug, Clone, Copy)]
struct DescriptorPath {
    service_id: u16,
    characteristic_id: u16,
    descriptor_id: u16,
    value_handle: AttributeHandle,
    is_client_config: bool,
}

/// 读取设备的全部服务
///
/// 结果按句柄排序，与 ATT 发现顺序一致。
async fn collect_records(
    device: &bluer::Device,
) -> Result<(Vec<ServiceRecord>, HashMap<u16, DescriptorPath>), bluer::Error> {
    let mut records = Vec::new();
    let mut descriptors = HashMap::new();

    let mut services = device.services().await?;
    services.sort_by_key(|s| s.id());

    for service in services {
        let service_id = service.id();
        let mut end = service_id;
        let mut record = if service.primary().await? {
            ServiceRecord::primary(service_id, service_id, service.uuid().await?)
        } else {
            ServiceRecord::secondary(service_id, service_id, service.uuid().await?)
        };

        let mut characteristics = service.characteristics().await?;
        characteristics.sort_by_key(|c| c.id());

        for characteristic in characteristics {
            let handle = characteristic.id();
            let value_handle = handle.saturating_add(1);
            end = end.max(value_handle);

            let flags = characteristic.flags().await?;
            let mut char_record = CharacteristicRecord::new(
                handle,
                value_handle,
                characteristic.uuid().await?,
                properties_from_flags(&flags),
            );

            let mut descs = characteristic.descriptors().await?;
            descs.sort_by_key(|d| d.id());
            for descriptor in descs {
                let uuid = descriptor.uuid().await?;
                end = end.max(descriptor.id());
                descriptors.insert(
                    descriptor.id(),
                    DescriptorPath {
                        service_id,
                        characteristic_id: handle,
                        descriptor_id: descriptor.id(),
                        value_handle: AttributeHandle(value_handle),
                        is_client_config: uuid == CLIENT_CHARACTERISTIC_CONFIGURATION,
                    },
                );
                char_record = char_record.with_descriptor(descriptor.id(), uuid);
            }

            record = record.with_characteristic(char_record);
        }

        record.end_handle = end;
        trace!(
            "BlueZ service 0x{:04X}..=0x{:04X} uuid={}",
            record.start_handle, record.end_handle, record.uuid
        );
        records.push(record);
    }

    Ok((records, descriptors))
}

/// 一个 BlueZ 连接的上下文
pub struct BluezSession {
    peer: DeviceKey,
    device: bluer::Device,
    descriptors: HashMap<u16, DescriptorPath>,
    graph: OnceLock<Weak<GattGraph>>,
    notify_tasks: Mutex<HashMap<AttributeHandle, JoinHandle<()>>>,
}

impl BluezSession {
    pub fn device(&self) -> &bluer::Device {
        &self.device
    }

    /// 停止所有通知流并断开连接
    /// 断开连接；返回时所有通知任务都已结束
    pub async fn disconnect(&self) -> Result<(), bluer::Error> {
        let tasks: Vec<_> = self
            .notify_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, task)| task)
            .collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        self.device.disconnect().await
    }

    fn stop_all_notifications(&self) {
        let mut tasks = self
            .notify_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }

    async fn start_notifications(
        &self,
        path: DescriptorPath,
        kind: NotificationKind,
    ) -> Result<(), GattError> {
        let Some(graph) = self.graph.get().cloned() else {
            return Err(GattError::HandlerGone);
        };

        let characteristic = self
            .device
            .service(path.service_id)
            .await
            .map_err(transport)?
            .characteristic(path.characteristic_id)
            .await
            .map_err(transport)?;
        let stream = characteristic.notify().await.map_err(transport)?;

        let value_handle = path.value_handle;
        let peer = self.peer;
        let task = tokio::spawn(async move {
            futures_util::pin_mut!(stream);
            while let Some(value) = stream.next().await {
                let Some(graph) = graph.upgrade() else {
                    break;
                };
                graph.deliver(value_handle, &value, kind);
            }
            debug!("Notification stream for {} on {} ended", value_handle, peer);
        });

        let previous = self
            .notify_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value_handle, task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    fn stop_notifications(&self, value_handle: AttributeHandle) {
        let task = self
            .notify_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&value_handle);
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for BluezSession {
    fn drop(&mut self) {
        self.stop_all_notifications();
    }
}

fn transport(e: bluer::Error) -> GattError {
    GattError::Transport(e.to_string())
}

#[async_trait]
impl GattSession for BluezSession {
    fn peer(&self) -> DeviceKey {
        self.peer
    }

    async fn write_descriptor(&self, handle: AttributeHandle, value: &[u8]) -> Result<(), GattError> {
        let Some(path) = self.descriptors.get(&handle.value()).copied() else {
            return Err(GattError::Transport(format!(
                "no descriptor at {} on {}",
                handle, self.peer
            )));
        };

        if path.is_client_config {
            let bits = value.first().copied().unwrap_or(0);
            if bits & 0x03 == 0x03 {
                warn!(
                    "{} on {} requests both notifications and indications, only notifications are started",
                    handle, self.peer
                );
            }
            return match client_config_stream(bits) {
                Some(kind) => self.start_notifications(path, kind).await,
                None => {
                    self.stop_notifications(path.value_handle);
                    Ok(())
                }
            };
        }

        self.device
            .service(path.service_id)
            .await
            .map_err(transport)?
            .characteristic(path.characteristic_id)
            .await
            .map_err(transport)?
            .descriptor(path.descriptor_id)
            .await
            .map_err(transport)?
            .write(value)
            .await
            .map_err(transport)
    }
}

/// CCCD 值对应的 BlueZ 通知流；BlueZ 每个特征只有一路，通知位优先
fn client_config_stream(bits: u8) -> Option<NotificationKind> {
    if bits & 0x01 != 0 {
        Some(NotificationKind::Notification)
    } else if bits & 0x02 != 0 {
        Some(NotificationKind::Indication)
    } else {
        None
    }
}

/// 被扫描发现的等待设备
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub key: DeviceKey,
    pub name: String,
    pub rssi: Option<i16>,
}

/// BlueZ 中心设备
pub struct BluezCentral {
    _session: bluer::Session,
    adapter: bluer::Adapter,
}

impl BluezCentral {
    pub async fn new() -> Result<Self, BluezError> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        debug!("Powering on adapter '{}'", adapter.name());
        adapter.set_powered(true).await?;
        Ok(Self {
            _session: session,
            adapter,
        })
    }

    async fn peer_of(&self, addr: bluer::Address) -> Result<DiscoveredPeer, BluezError> {
        let device = self.adapter.device(addr)?;
        let address_type = device.address_type().await?;
        let name = device.name().await?.unwrap_or_default();
        let rssi = device.rssi().await?;
        Ok(DiscoveredPeer {
            key: DeviceKey::new(addr.into(), address_type.into()),
            name,
            rssi,
        })
    }

    /// 扫描一段时间，返回注册表正在等待且尚未处理的设备
    pub async fn scan_awaited(
        &self,
        registry: &DeviceRegistry,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredPeer>, BluezError> {
        let mut discoverer = self.adapter.discover_devices().await?;
        let mut found: HashMap<DeviceKey, DiscoveredPeer> = HashMap::new();

        info!("Scanning for awaited devices for {} seconds", timeout.as_secs());

        let timeout_fut = time::sleep(timeout);
        tokio::pin!(timeout_fut);

        loop {
            tokio::select! {
                _ = &mut timeout_fut => break,
                event = discoverer.next() => {
                    match event {
                        Some(AdapterEvent::DeviceAdded(addr)) => {
                            let peer = match self.peer_of(addr).await {
                                Ok(peer) => peer,
                                Err(e) => {
                                    debug!("Skipping {}: {}", addr, e);
                                    continue;
                                }
                            };
                            if is_candidate(registry, &peer) && !found.contains_key(&peer.key) {
                                debug!("Awaited device found: {} '{}'", peer.key, peer.name);
                                found.insert(peer.key, peer);
                            }
                        }
                        None => break,
                        _ => {}
                    }
                }
            }
        }

        // 扫描开始前已缓存的设备
        for addr in self.adapter.device_addresses().await? {
            if let Ok(peer) = self.peer_of(addr).await {
                if is_candidate(registry, &peer) && !found.contains_key(&peer.key) {
                    debug!("Awaited device in cache: {} '{}'", peer.key, peer.name);
                    found.insert(peer.key, peer);
                }
            }
        }

        info!("Scan complete: {} awaited device(s)", found.len());
        Ok(found.into_values().collect())
    }

    /// 连接并完成服务发现
    ///
    /// 返回的会话必须由调用方持有；图只保留指向它的弱引用。
    pub async fn connect(
        &self,
        key: &DeviceKey,
    ) -> Result<(Arc<BluezSession>, Arc<GattGraph>), BluezError> {
        let device = self.adapter.device(key.address.into())?;
        if device.address_type().await.is_err() {
            return Err(BluezError::UnknownDevice(*key));
        }

        let connected_here = !device.is_connected().await?;
        if connected_here {
            info!("Connecting to {}", key);
            device.connect().await?;
        }

        let (records, descriptors) = release_on_error(
            resolve_services(key, &device).await,
            connected_here,
            release(key, &device),
        )
        .await?;

        let session = Arc::new(BluezSession {
            peer: *key,
            device,
            descriptors,
            graph: OnceLock::new(),
            notify_tasks: Mutex::new(HashMap::new()),
        });
        let dyn_session: Arc<dyn GattSession> = session.clone();
        let graph = release_on_error(
            GattGraph::assemble(*key, &records, Arc::downgrade(&dyn_session))
                .map_err(BluezError::from),
            connected_here,
            release(key, &session.device),
        )
        .await?;
        let graph = Arc::new(graph);
        let _ = session.graph.set(Arc::downgrade(&graph));

        info!(
            "Discovered {} service(s) on {}",
            graph.service_count(),
            key
        );
        Ok((session, graph))
    }
}

async fn resolve_services(
    key: &DeviceKey,
    device: &bluer::Device,
) -> Result<(Vec<ServiceRecord>, HashMap<u16, DescriptorPath>), BluezError> {
    let resolved = time::timeout(SERVICES_RESOLVE_TIMEOUT, async {
        while !device.is_services_resolved().await? {
            time::sleep(Duration::from_millis(200)).await;
        }
        Ok::<_, bluer::Error>(())
    })
    .await;
    match resolved {
        Ok(result) => result?,
        Err(_) => {
            warn!("Services of {} not resolved in time", key);
            return Err(BluezError::ResolveTimeout(*key));
        }
    }
    Ok(collect_records(device).await?)
}

async fn release(key: &DeviceKey, device: &bluer::Device) {
    info!("Releasing connection to {}", key);
    if let Err(e) = device.disconnect().await {
        debug!("Disconnect from {} failed: {}", key, e);
    }
}

/// 本次调用建立的连接在后续步骤失败时断开
async fn release_on_error<T, E>(
    result: Result<T, E>,
    connected_here: bool,
    release: impl Future<Output = ()>,
) -> Result<T, E> {
    if result.is_err() && connected_here {
        release.await;
    }
    result
}

fn is_candidate(registry: &DeviceRegistry, peer: &DiscoveredPeer) -> bool {
    registry.is_awaited(&peer.key, &peer.name)
        && !registry.is_processed(&peer.key)
        && !registry.is_processing(&peer.key)
}
