//! Creating the native bus object behind a managed service object.

use crate::dispatch::{DispatchTable, PropertyProvider};
use crate::handle::WeakHandle;
use crate::native::{BusAttachment, ObjectId};
use crate::{BridgeError, Status};
use std::fmt;
use std::sync::Arc;

/// A managed object published on the bus at a fixed path.
pub trait ServiceObject: PropertyProvider {
    fn service_object_path(&self) -> String;

    /// Take ownership of the native handle created for this object.
    fn attach_bus_object(&self, object: BusObject);
}

/// Owned native bus object. Destroyed on the bus when dropped.
pub struct BusObject {
    id: ObjectId,
    path: String,
    bus: Arc<dyn BusAttachment>,
}

impl BusObject {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Make the object reachable by remote peers.
    pub fn register(&self) -> Result<(), BridgeError> {
        self.bus.register_bus_object(self.id).check()
    }
}

impl Drop for BusObject {
    fn drop(&mut self) {
        tracing::debug!("Destroying bus object {}", self.path);
        self.bus.destroy_bus_object(self.id);
    }
}

impl fmt::Debug for BusObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusObject")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

/// Create the native bus object for the target of `handle`, wiring only its
/// property get/set handlers, and hand it to the target.
pub fn create_bus_object<T: ServiceObject>(
    bus: &Arc<dyn BusAttachment>,
    handle: &WeakHandle<T>,
) -> Result<(), BridgeError> {
    let target = handle.resolve()?;
    let path = target.service_object_path();

    let Some(id) = bus.create_bus_object(
        &path,
        false,
        DispatchTable::bus_object::<T>(),
        handle.context(),
    ) else {
        tracing::warn!("Native layer refused bus object at '{}'", path);
        return Err(BridgeError::Native(Status::FAIL));
    };

    tracing::info!("Created bus object {}", path);
    target.attach_bus_object(BusObject {
        id,
        path,
        bus: bus.clone(),
    });
    Ok(())
}
