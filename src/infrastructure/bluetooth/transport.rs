//! Board Link Transport
//!
//! The narrow seam between the session engine and the BLE stack: connect,
//! discover, read/write/subscribe, and a notification channel. The engine
//! is written against [`BoardTransport`] so the whole unlock flow can be
//! exercised against a scripted transport; [`BleTransport`] is the real
//! implementation over a btleplug peripheral.

use crate::domain::models::BoardError;
use btleplug::api::{CharPropFlags, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// One characteristic as reported by service discovery.
#[derive(Debug, Clone)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub notifies: bool,
}

#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// A value pushed by the board on a subscribed characteristic. Delivery is
/// ordered per characteristic.
#[derive(Debug, Clone)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

/// Async wireless link operations the engine consumes. Characteristics are
/// addressed by UUID; the implementation resolves them to its own handles.
pub trait BoardTransport: Send + Sync + 'static {
    fn connect(&self, timeout: Duration) -> impl Future<Output = Result<(), BoardError>> + Send;
    fn disconnect(&self) -> impl Future<Output = Result<(), BoardError>> + Send;
    fn is_connected(&self) -> impl Future<Output = bool> + Send;
    fn discover(&self) -> impl Future<Output = Result<Vec<ServiceInfo>, BoardError>> + Send;
    fn read(&self, uuid: Uuid) -> impl Future<Output = Result<Vec<u8>, BoardError>> + Send;
    fn write(
        &self,
        uuid: Uuid,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), BoardError>> + Send;
    fn subscribe(&self, uuid: Uuid) -> impl Future<Output = Result<(), BoardError>> + Send;
    fn unsubscribe(&self, uuid: Uuid) -> impl Future<Output = Result<(), BoardError>> + Send;
    /// Single notification channel for the connection; call once per
    /// session, after connecting.
    fn notifications(
        &self,
    ) -> impl Future<Output = Result<mpsc::Receiver<Notification>, BoardError>> + Send;
}

fn link_err(e: btleplug::Error) -> BoardError {
    BoardError::Link(e.to_string())
}

/// btleplug-backed transport.
pub struct BleTransport {
    peripheral: Peripheral,
    characteristics: Mutex<HashMap<Uuid, btleplug::api::Characteristic>>,
}

impl BleTransport {
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, uuid: Uuid) -> Result<btleplug::api::Characteristic, BoardError> {
        self.characteristics
            .lock()
            .expect("characteristic cache poisoned")
            .get(&uuid)
            .cloned()
            .ok_or_else(|| BoardError::Link(format!("characteristic {uuid} not discovered")))
    }
}

impl BoardTransport for BleTransport {
    fn connect(&self, timeout: Duration) -> impl Future<Output = Result<(), BoardError>> + Send {
        async move {
            tokio::time::timeout(timeout, self.peripheral.connect())
                .await
                .map_err(|_| BoardError::Link(format!("connect timed out after {timeout:?}")))?
                .map_err(link_err)?;

            // BlueZ signals connection completion before its GATT cache is
            // populated; discovering too early yields an empty service set.
            #[cfg(target_os = "linux")]
            tokio::time::sleep(Duration::from_millis(600)).await;

            Ok(())
        }
    }

    fn disconnect(&self) -> impl Future<Output = Result<(), BoardError>> + Send {
        async move { self.peripheral.disconnect().await.map_err(link_err) }
    }

    fn is_connected(&self) -> impl Future<Output = bool> + Send {
        async move { self.peripheral.is_connected().await.unwrap_or(false) }
    }

    fn discover(&self) -> impl Future<Output = Result<Vec<ServiceInfo>, BoardError>> + Send {
        async move {
            self.peripheral.discover_services().await.map_err(link_err)?;

            let mut services = Vec::new();
            for service in self.peripheral.services() {
                let characteristics = service
                    .characteristics
                    .iter()
                    .map(|c| CharacteristicInfo {
                        uuid: c.uuid,
                        notifies: c.properties.contains(CharPropFlags::NOTIFY),
                    })
                    .collect();
                services.push(ServiceInfo {
                    uuid: service.uuid,
                    characteristics,
                });
            }

            let mut cache = self
                .characteristics
                .lock()
                .expect("characteristic cache poisoned");
            cache.clear();
            for c in self.peripheral.characteristics() {
                cache.insert(c.uuid, c);
            }

            Ok(services)
        }
    }

    fn read(&self, uuid: Uuid) -> impl Future<Output = Result<Vec<u8>, BoardError>> + Send {
        async move {
            let characteristic = self.resolve(uuid)?;
            self.peripheral.read(&characteristic).await.map_err(link_err)
        }
    }

    fn write(
        &self,
        uuid: Uuid,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), BoardError>> + Send {
        async move {
            let characteristic = self.resolve(uuid)?;
            self.peripheral
                .write(&characteristic, payload, WriteType::WithResponse)
                .await
                .map_err(link_err)
        }
    }

    fn subscribe(&self, uuid: Uuid) -> impl Future<Output = Result<(), BoardError>> + Send {
        async move {
            let characteristic = self.resolve(uuid)?;
            self.peripheral
                .subscribe(&characteristic)
                .await
                .map_err(link_err)
        }
    }

    fn unsubscribe(&self, uuid: Uuid) -> impl Future<Output = Result<(), BoardError>> + Send {
        async move {
            let characteristic = self.resolve(uuid)?;
            self.peripheral
                .unsubscribe(&characteristic)
                .await
                .map_err(link_err)
        }
    }

    fn notifications(
        &self,
    ) -> impl Future<Output = Result<mpsc::Receiver<Notification>, BoardError>> + Send {
        async move {
            let mut stream = self.peripheral.notifications().await.map_err(link_err)?;
            let (tx, rx) = mpsc::channel(256);

            // Forward until the stream closes (link dropped) or the session
            // stops listening.
            tokio::spawn(async move {
                while let Some(notification) = stream.next().await {
                    let forwarded = Notification {
                        uuid: notification.uuid,
                        value: notification.value,
                    };
                    if tx.send(forwarded).await.is_err() {
                        break;
                    }
                }
                warn!("notification stream ended");
            });

            Ok(rx)
        }
    }
}
