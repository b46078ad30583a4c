//! Blocking access to properties of remote objects.
//!
//! The native layer only offers callback-driven property reads and writes.
//! [`PropertyAccess`] issues the request with a registered
//! [`CompletionContext`] as user data and blocks until the completion fires.

use crate::completion::{CompletionContext, PropertyGetContext, PropertySetContext};
use crate::dispatch::{DispatchTable, PropertiesChangedHandler};
use crate::handle::{self, WeakHandle};
use crate::native::{BusAttachment, Context, ProxyBusObject};
use crate::{BridgeConfig, BridgeError, FromArg, IntoArg, MsgArg, Status};
use std::sync::Arc;
use std::time::Duration;

/// Synchronous property reads and writes over a bus attachment.
///
/// The native layer is asked to give up after `message_timeout_ms` and then
/// completes with `BUS_TIMEOUT`. If it never completes at all, the caller is
/// released after `message_timeout_ms + wait_grace_ms` with
/// [`BridgeError::Timeout`], so a silent native layer costs the full
/// timeout plus the grace period.
pub struct PropertyAccess<'a> {
    bus: &'a dyn BusAttachment,
    timeout: Duration,
    grace: Duration,
}

impl<'a> PropertyAccess<'a> {
    pub fn new(bus: &'a dyn BusAttachment, config: &BridgeConfig) -> Self {
        Self {
            bus,
            timeout: config.message_timeout(),
            grace: config.wait_grace(),
        }
    }

    /// Read `interface_name.property_name` from `proxy`.
    ///
    /// Blocks for at most the message timeout plus the wait grace.
    pub fn get<T: FromArg>(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        property_name: &str,
    ) -> Result<T, BridgeError> {
        let ctx = Arc::new(PropertyGetContext::<MsgArg>::new());
        let handle = WeakHandle::new(&ctx);

        tracing::debug!(
            "Getting {}.{} from {}{}",
            interface_name,
            property_name,
            proxy.service,
            proxy.path
        );
        self.bus
            .get_property_async(
                proxy,
                interface_name,
                property_name,
                get_property_complete,
                self.timeout,
                handle.context(),
            )
            .check()?;

        let value = self.wait(&ctx)?.unwrap_or_default();
        value.get()
    }

    /// Write `value` to `interface_name.property_name` on `proxy`.
    pub fn set(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        property_name: &str,
        value: impl IntoArg,
    ) -> Result<(), BridgeError> {
        let mut arg = MsgArg::new();
        arg.set(value).check()?;

        let ctx = Arc::new(PropertySetContext::new());
        let handle = WeakHandle::new(&ctx);

        tracing::debug!(
            "Setting {}.{} on {}{}",
            interface_name,
            property_name,
            proxy.service,
            proxy.path
        );
        self.bus
            .set_property_async(
                proxy,
                interface_name,
                property_name,
                arg,
                set_property_complete,
                self.timeout,
                handle.context(),
            )
            .check()?;

        self.wait(&ctx).map(|_| ())
    }

    /// Block for the completion. The native layer reports its own timeout as
    /// `BUS_TIMEOUT`; the grace period only covers a layer that never calls back.
    fn wait<V>(&self, ctx: &CompletionContext<V>) -> Result<Option<V>, BridgeError> {
        let bound = self.timeout + self.grace;
        if !ctx.wait_timeout(bound) {
            tracing::warn!("No completion from native layer within {:?}", bound);
            return Err(BridgeError::Timeout(bound));
        }
        ctx.status().check()?;
        Ok(ctx.take_value())
    }
}

fn get_property_complete(status: Status, proxy: &ProxyBusObject, value: &MsgArg, context: Context) {
    match handle::resolve::<PropertyGetContext<MsgArg>>(context) {
        Ok(ctx) => ctx.complete(status, status.is_ok().then(|| value.clone())),
        Err(e) => tracing::debug!("Dropping property reply from {}: {}", proxy.service, e),
    }
}

fn set_property_complete(status: Status, proxy: &ProxyBusObject, context: Context) {
    match handle::resolve::<PropertySetContext>(context) {
        Ok(ctx) => ctx.complete(status, Some(())),
        Err(e) => tracing::debug!("Dropping property reply from {}: {}", proxy.service, e),
    }
}

/// Route property change signals of `interface_name` on `proxy` to `T`.
pub fn subscribe_properties_changed<T: PropertiesChangedHandler>(
    bus: &dyn BusAttachment,
    proxy: &ProxyBusObject,
    interface_name: &str,
    handle: &WeakHandle<T>,
) -> Result<(), BridgeError> {
    bus.register_properties_changed_listener(
        proxy,
        interface_name,
        DispatchTable::properties_changed::<T>(),
        handle.context(),
    )
    .check()
}
